use proptest::prelude::*;
use tased_log::{FrameInput, InputSource, LagLog, LagState, MarkerSet, Movie};
use tased_timeline::{
    BranchGraph, ChangeRequest, History, Live, LiveMut, ModificationKind, Snapshot, TimelineConfig,
};

#[derive(Debug, Clone)]
enum Edit {
    Set(u32, u8),
    Insert(u32),
    Delete(u32),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0u32..60, 1u8..=255).prop_map(|(frame, buttons)| Edit::Set(frame, buttons)),
        (0u32..60).prop_map(Edit::Insert),
        (0u32..60).prop_map(Edit::Delete),
    ]
}

struct Timeline {
    movie: Movie,
    lag: LagLog,
    markers: MarkerSet,
    branches: BranchGraph,
    history: History,
}

impl Timeline {
    fn new(undo_levels: usize) -> Self {
        let movie = Movie::from_frames(1, vec![FrameInput::EMPTY; 50]);
        let mut lag = LagLog::new();
        for frame in 0..50 {
            lag.set(frame, LagState::NotLagged);
        }
        let markers = MarkerSet::new();
        let config = TimelineConfig {
            max_undo_levels: undo_levels,
            ..TimelineConfig::default()
        };
        let history = History::new(&config, Snapshot::capture(&movie, &lag, &markers, true));
        Self {
            movie,
            lag,
            markers,
            branches: BranchGraph::new(),
            history,
        }
    }

    fn apply(&mut self, edit: &Edit) -> Option<u32> {
        let request = match *edit {
            Edit::Set(frame, buttons) => {
                self.movie.set_frame(frame, FrameInput::single(buttons));
                ChangeRequest::span(ModificationKind::Set, frame, frame)
            }
            Edit::Insert(frame) => {
                let frame = frame.min(self.movie.frame_count());
                self.movie.insert(frame, 1);
                ChangeRequest::new(ModificationKind::InsertNum, frame)
            }
            Edit::Delete(frame) => {
                self.movie.erase(frame, 1);
                ChangeRequest::new(ModificationKind::Delete, frame).with_selection(vec![frame])
            }
        };
        let live = Live {
            input: &self.movie,
            lag: &self.lag,
            markers: &self.markers,
        };
        self.history.register_changes(live, &request)
    }

    fn jump(&mut self, position: usize) -> Option<u32> {
        let live = LiveMut {
            input: &mut self.movie,
            lag: &mut self.lag,
            markers: &mut self.markers,
        };
        self.history.jump_to(position, live, &mut self.branches)
    }
}

proptest! {
    #[test]
    fn undo_then_redo_restores_input(edits in prop::collection::vec(edit_strategy(), 1..20)) {
        let mut timeline = Timeline::new(100);
        let mut states = vec![timeline.movie.clone()];
        for edit in &edits {
            if timeline.apply(edit).is_some() {
                states.push(timeline.movie.clone());
            }
        }
        prop_assert_eq!(timeline.history.len(), states.len());

        let top = timeline.history.cursor();
        timeline.jump(0);
        prop_assert_eq!(&timeline.movie, &states[0]);
        for position in 1..=top {
            timeline.jump(position);
            prop_assert_eq!(&timeline.movie, &states[position]);
        }
    }

    #[test]
    fn history_never_exceeds_capacity(
        undo_levels in 1usize..8,
        edits in prop::collection::vec(edit_strategy(), 0..40),
    ) {
        let mut timeline = Timeline::new(undo_levels);
        for edit in &edits {
            timeline.apply(edit);
            prop_assert!(timeline.history.len() <= undo_levels + 1);
            prop_assert_eq!(timeline.history.cursor(), timeline.history.len() - 1);
        }
    }

    #[test]
    fn jump_reports_first_changed_frame(edits in prop::collection::vec(edit_strategy(), 1..10)) {
        let mut timeline = Timeline::new(100);
        let initial = timeline.movie.clone();
        for edit in &edits {
            timeline.apply(edit);
        }
        let edited = timeline.movie.clone();
        let first = timeline.jump(0);
        let expected = Snapshot::capture(&edited, &LagLog::new(), &MarkerSet::new(), false)
            .input()
            .find_first_difference_in(&initial, ..);
        prop_assert_eq!(first, expected);
    }
}
