use proptest::prelude::*;
use tased_log::{FrameInput, InputLog, LagLog, LagState, MarkerSet, Movie};

fn movie_strategy() -> impl Strategy<Value = Movie> {
    (1usize..=4, prop::collection::vec((any::<[u8; 4]>(), any::<u8>()), 0..200)).prop_map(
        |(joysticks, frames)| {
            Movie::from_frames(
                joysticks,
                frames
                    .into_iter()
                    .map(|(joysticks, commands)| FrameInput {
                        joysticks,
                        commands,
                    })
                    .collect(),
            )
        },
    )
}

fn lag_strategy() -> impl Strategy<Value = LagLog> {
    prop::collection::vec(0u8..3, 0..300).prop_map(|states| {
        let mut log = LagLog::new();
        for (frame, state) in states.into_iter().enumerate() {
            let state = match state {
                0 => LagState::NotLagged,
                1 => LagState::Lagged,
                _ => LagState::Unknown,
            };
            log.set(frame as u32, state);
        }
        log
    })
}

fn marker_strategy() -> impl Strategy<Value = MarkerSet> {
    (
        0u32..300,
        prop::collection::vec((0u32..300, "[a-z ]{0,12}"), 0..20),
    )
        .prop_map(|(len, marks)| {
            let mut markers = MarkerSet::new();
            markers.resize(len);
            for (frame, note) in marks {
                let id = markers.set_marker(frame);
                markers.set_note(id, &note);
            }
            markers
        })
}

proptest! {
    #[test]
    fn input_log_compression_round_trips(movie in movie_strategy(), hot in any::<bool>()) {
        let log = InputLog::capture(&movie, hot);
        let packed = log.compress().unwrap();
        prop_assert_eq!(InputLog::decompress(&packed).unwrap(), log);
    }

    #[test]
    fn lag_log_compression_round_trips(log in lag_strategy()) {
        let packed = log.compress().unwrap();
        prop_assert_eq!(LagLog::decompress(&packed).unwrap(), log);
    }

    #[test]
    fn marker_compression_round_trips(markers in marker_strategy()) {
        let packed = markers.compress().unwrap();
        prop_assert_eq!(MarkerSet::decompress(&packed).unwrap(), markers);
    }

    #[test]
    fn logs_never_differ_from_themselves(
        movie in movie_strategy(),
        lag in lag_strategy(),
        markers in marker_strategy(),
        start in 0u32..400,
        len in 0u32..400,
    ) {
        let log = InputLog::capture(&movie, false);
        prop_assert_eq!(log.find_first_difference(&log, start..start + len), None);
        prop_assert_eq!(log.find_first_difference_in(&movie, ..), None);
        prop_assert_eq!(lag.find_first_difference(&lag, start..), None);
        prop_assert_eq!(lag.find_first_conflict(&lag), None);
        prop_assert_eq!(markers.find_first_difference(&markers, ..=start), None);
    }

    #[test]
    fn first_difference_is_first(movie in movie_strategy(), frame in 0u32..200, buttons in 1u8..) {
        prop_assume!(frame < movie.frames().len() as u32);
        let before = InputLog::capture(&movie, false);
        let mut edited = movie.clone();
        let mut input = edited.frames()[frame as usize];
        input.joysticks[0] ^= buttons;
        tased_log::InputSource::set_frame(&mut edited, frame, input);
        let after = InputLog::capture(&edited, false);
        prop_assert_eq!(before.find_first_difference(&after, ..), Some(frame));
        prop_assert_eq!(after.find_first_difference(&before, ..), Some(frame));
    }
}
