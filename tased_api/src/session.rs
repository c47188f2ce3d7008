use tased_log::{FrameInput, InputLog, InputSource, LagState, MarkerSet};
use tased_timeline::{
    Branch, BranchGraph, BranchSlot, ChangeRequest, ExecutionEngine, Greenzone, History,
    Invalidation, Live, LiveMut, ModificationKind, Snapshot, TimelineConfig, TimelineObserver,
};

use crate::Error;

/// An open editing session: the live timeline together with its history, cache and
/// branches.
///
/// Every edit goes through the session so that the first changed frame is recorded in
/// history, the greenzone is invalidated from that frame, and the observer is notified.
/// The engine is always in the state of [EditorSession::playback_frame], which is kept
/// inside the explored part of the greenzone.
#[derive(Debug)]
pub struct EditorSession<S, E, O = ()> {
    pub(crate) config: TimelineConfig,
    pub(crate) input: S,
    pub(crate) markers: MarkerSet,
    pub(crate) history: History,
    pub(crate) greenzone: Greenzone,
    pub(crate) branches: BranchGraph,
    pub(crate) engine: E,
    pub(crate) observer: O,
    pub(crate) power_on: Vec<u8>,
    pub(crate) playback_frame: u32,
}

impl<S: InputSource, E: ExecutionEngine, O: TimelineObserver> EditorSession<S, E, O> {
    /// Start a session on `input`.
    ///
    /// `engine` should be in its power-on state, which becomes the checkpoint for frame 0.
    pub fn new(config: TimelineConfig, input: S, engine: E, observer: O) -> Self {
        let mut markers = MarkerSet::new();
        markers.resize(input.frame_count());
        let power_on = engine.serialize_state();
        let mut greenzone = Greenzone::new();
        greenzone.write_checkpoint(0, power_on.clone());
        let initial = Snapshot::capture(
            &input,
            greenzone.lag(),
            &markers,
            config.enable_hot_changes,
        );
        let history = History::new(&config, initial);
        Self {
            config,
            input,
            markers,
            history,
            greenzone,
            branches: BranchGraph::new(),
            engine,
            observer,
            power_on,
            playback_frame: 0,
        }
    }

    /// The current settings.
    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Apply new settings.
    pub fn set_config(&mut self, config: TimelineConfig) {
        self.history.configure(&config);
        self.config = config;
    }

    /// The live input.
    pub fn input(&self) -> &S {
        &self.input
    }

    /// The live markers.
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Undo history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// The checkpoint cache and live lag log.
    pub fn greenzone(&self) -> &Greenzone {
        &self.greenzone
    }

    /// The branch slots.
    pub fn branches(&self) -> &BranchGraph {
        &self.branches
    }

    /// Mutable access to the branch graph, for resolving cached relations.
    pub fn branches_mut(&mut self) -> &mut BranchGraph {
        &mut self.branches
    }

    /// The execution engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The invalidation observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable access to the invalidation observer.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// The frame the engine is currently on.
    pub fn playback_frame(&self) -> u32 {
        self.playback_frame
    }

    fn history_and_live(&mut self) -> (&mut History, Live<'_, S>) {
        (
            &mut self.history,
            Live {
                input: &self.input,
                lag: self.greenzone.lag(),
                markers: &self.markers,
            },
        )
    }

    fn history_and_live_mut(&mut self) -> (&mut History, LiveMut<'_, S>, &mut BranchGraph) {
        (
            &mut self.history,
            LiveMut {
                input: &mut self.input,
                lag: self.greenzone.lag_mut(),
                markers: &mut self.markers,
            },
            &mut self.branches,
        )
    }

    fn sync_marker_len(&mut self) {
        let len = self.input.frame_count();
        if self.markers.len() != len {
            self.markers.resize(len);
        }
    }

    fn invalidate(&mut self, first: Option<u32>) -> Result<Invalidation, Error> {
        if let Some(frame) = first {
            self.greenzone.invalidate(frame);
            self.observer.invalidated(frame);
            self.ensure_playback_in_greenzone()?;
        }
        Ok(Invalidation::from_first_difference(first))
    }

    fn after_edit(&mut self, first: Option<u32>) -> Result<Invalidation, Error> {
        if first.is_some() {
            self.branches.mark_dirty();
        }
        self.invalidate(first)
    }

    fn commit(&mut self, request: &ChangeRequest) -> Result<Invalidation, Error> {
        self.sync_marker_len();
        let (history, live) = self.history_and_live();
        let first = history.register_changes(live, request);
        self.after_edit(first)
    }

    /// Apply an arbitrary edit to the live input and markers, then record it as `request`.
    pub fn apply_edit(
        &mut self,
        request: &ChangeRequest,
        edit: impl FnOnce(&mut S, &mut MarkerSet),
    ) -> Result<Invalidation, Error> {
        edit(&mut self.input, &mut self.markers);
        self.commit(request)
    }

    /// Overwrite the input on one frame, growing the movie if needed.
    ///
    /// Consecutive calls with the same `tag` are merged into one history entry.
    pub fn set_frame_input(
        &mut self,
        frame: u32,
        input: FrameInput,
        tag: Option<u32>,
    ) -> Result<Invalidation, Error> {
        let kind = if input == FrameInput::EMPTY {
            ModificationKind::Unset
        } else {
            ModificationKind::Set
        };
        let mut request = ChangeRequest::span(kind, frame, frame);
        if let Some(tag) = tag {
            request = request.with_tag(tag);
        }
        self.apply_edit(&request, |movie, _| {
            if frame >= movie.frame_count() {
                movie.resize(frame + 1);
            }
            movie.set_frame(frame, input);
        })
    }

    /// Insert `count` empty frames before `at`.
    pub fn insert_frames(&mut self, at: u32, count: u32) -> Result<Invalidation, Error> {
        if count == 0 {
            return Ok(Invalidation::None);
        }
        let at = at.min(self.input.frame_count());
        self.input.insert(at, count);
        self.greenzone
            .lag_mut()
            .insert_frames(at, LagState::Unknown, count);
        if self.config.bind_markers_to_input {
            self.markers.insert_empty(at, count);
        }
        let request = ChangeRequest::new(ModificationKind::InsertNum, at).with_count(count);
        self.commit(&request)
    }

    /// Delete the given frames.
    pub fn delete_frames(&mut self, frames: &[u32]) -> Result<Invalidation, Error> {
        let len = self.input.frame_count();
        let mut frames: Vec<u32> = frames.iter().copied().filter(|&f| f < len).collect();
        frames.sort_unstable();
        frames.dedup();
        let start = match frames.first() {
            Some(&start) => start,
            None => return Ok(Invalidation::None),
        };
        for &frame in frames.iter().rev() {
            self.input.erase(frame, 1);
            self.greenzone.lag_mut().erase_frames(frame, 1);
            if self.config.bind_markers_to_input {
                self.markers.erase_frames(frame, 1);
            }
        }
        let request = ChangeRequest::new(ModificationKind::Delete, start).with_selection(frames);
        self.commit(&request)
    }

    /// Cut the movie down to `len` frames.
    pub fn truncate(&mut self, len: u32) -> Result<Invalidation, Error> {
        if len >= self.input.frame_count() {
            return Ok(Invalidation::None);
        }
        self.input.resize(len);
        self.markers.truncate(len);
        let request = ChangeRequest::new(ModificationKind::Truncate, len);
        self.commit(&request)
    }

    /// Record `input` on the playback frame, appending to the movie if needed.
    ///
    /// Call [EditorSession::advance] afterward to run the recorded frame.
    pub fn record_input(&mut self, input: FrameInput) -> Result<Invalidation, Error> {
        let frame = self.playback_frame;
        let appended = frame >= self.input.frame_count();
        if appended {
            self.input.resize(frame + 1);
        }
        let previous = self.input.frame(frame);
        let joypad_bits = previous.difference_bits(&input);
        if joypad_bits == 0 && !appended {
            return Ok(Invalidation::None);
        }
        self.input.set_frame(frame, input);
        self.sync_marker_len();
        let (history, live) = self.history_and_live();
        history.register_recording(live, frame, joypad_bits);
        self.after_edit(Some(frame))
    }

    fn commit_markers(
        &mut self,
        kind: ModificationKind,
        start: u32,
        end: Option<u32>,
        comment: Option<&str>,
    ) -> bool {
        let (history, live) = self.history_and_live();
        let changed = history.register_markers_change(live, kind, start, end, comment);
        if changed {
            self.branches.mark_dirty();
        }
        changed
    }

    /// Put a marker on `frame`. Returns false if there already was one.
    pub fn set_marker(&mut self, frame: u32) -> bool {
        if frame >= self.markers.len() || self.markers.marker_at(frame) != 0 {
            return false;
        }
        self.markers.set_marker(frame);
        self.commit_markers(ModificationKind::MarkerSet, frame, Some(frame), None)
    }

    /// Remove the marker on `frame`. Returns false if there was none.
    pub fn remove_marker(&mut self, frame: u32) -> bool {
        if !self.markers.remove_marker(frame) {
            return false;
        }
        self.commit_markers(ModificationKind::MarkerRemove, frame, Some(frame), None)
    }

    /// Change the note of marker `id`, where id 0 is the global note.
    pub fn rename_marker(&mut self, id: u32, text: &str) -> bool {
        if !self.markers.set_note(id, text) {
            return false;
        }
        let frame = self.markers.frame_of(id).unwrap_or(0);
        self.commit_markers(ModificationKind::MarkerRename, frame, Some(frame), Some(text))
    }

    /// Drag the marker on `from` to `to`.
    pub fn move_marker(&mut self, from: u32, to: u32) -> bool {
        if !self.markers.move_marker(from, to) {
            return false;
        }
        self.commit_markers(ModificationKind::MarkerDrag, from, Some(to), None)
    }

    /// Exchange the markers on two frames.
    pub fn swap_markers(&mut self, a: u32, b: u32) -> bool {
        if !self.markers.swap_markers(a, b) {
            return false;
        }
        self.commit_markers(ModificationKind::MarkerSwap, a, Some(b), None)
    }

    /// Replace the whole movie with `source`.
    pub fn import_input<T: InputSource + ?Sized>(
        &mut self,
        source: &T,
        name: &str,
    ) -> Result<Invalidation, Error> {
        InputLog::capture(source, false).write_to(&mut self.input, 0);
        self.sync_marker_len();
        let (history, live) = self.history_and_live();
        let first = history.register_import(live, name);
        self.after_edit(first)
    }

    /// Record edits that a script already made to the live input.
    pub fn register_script_changes(
        &mut self,
        name: &str,
        start: u32,
        insertion_or_deletion: bool,
    ) -> Result<Invalidation, Error> {
        self.sync_marker_len();
        let (history, live) = self.history_and_live();
        let first = history.register_script_changes(live, name, start, insertion_or_deletion);
        self.after_edit(first)
    }

    /// Step back in history.
    pub fn undo(&mut self) -> Result<Invalidation, Error> {
        let (history, live, branches) = self.history_and_live_mut();
        let first = history.undo(live, branches);
        self.invalidate(first)
    }

    /// Step forward in history.
    pub fn redo(&mut self) -> Result<Invalidation, Error> {
        let (history, live, branches) = self.history_and_live_mut();
        let first = history.redo(live, branches);
        self.invalidate(first)
    }

    /// Jump to any history entry.
    pub fn jump_to(&mut self, position: usize) -> Result<Invalidation, Error> {
        let (history, live, branches) = self.history_and_live_mut();
        let first = history.jump_to(position, live, branches);
        self.invalidate(first)
    }

    pub(crate) fn restore_checkpoint(&mut self, frame: u32) -> Result<(), Error> {
        if !self.greenzone.restore(frame, &mut self.engine)? {
            return Err(Error::RestoreFailed { frame });
        }
        self.playback_frame = frame;
        Ok(())
    }

    fn restore_nearest(&mut self, frame: u32) -> Result<(), Error> {
        let base = self
            .greenzone
            .nearest_checkpoint(frame)
            .ok_or(Error::MissingCheckpoint { frame })?;
        self.restore_checkpoint(base)
    }

    /// Run the playback frame, returning its lag flag and its previous lag state.
    fn run_frame(&mut self) -> (u32, bool, LagState) {
        let frame = self.playback_frame;
        self.greenzone.collect(frame, &self.engine);
        let lagged = self.engine.run_frame(&self.input.frame(frame));
        self.playback_frame = frame + 1;
        let previous = self.greenzone.update_lag(frame, lagged);
        self.greenzone.collect(frame + 1, &self.engine);
        (frame, lagged, previous)
    }

    /// Replay already explored frames, without lag adjustment.
    pub(crate) fn replay_to(&mut self, frame: u32) -> Result<(), Error> {
        self.restore_nearest(frame)?;
        while self.playback_frame < frame {
            self.run_frame();
        }
        Ok(())
    }

    fn ensure_playback_in_greenzone(&mut self) -> Result<(), Error> {
        let size = self.greenzone.size().max(1);
        if self.playback_frame >= size {
            self.replay_to(size - 1)?;
        }
        Ok(())
    }

    /// Run one frame, collecting checkpoints and keeping the input in line with lag.
    ///
    /// Returns true if the frame lagged.
    pub fn advance(&mut self) -> Result<bool, Error> {
        let (frame, lagged, previous) = self.run_frame();
        if self.config.auto_adjust_input_for_lag {
            match (previous, lagged) {
                (LagState::Lagged, false) => self.adjust_up(frame)?,
                (LagState::NotLagged, true) => self.adjust_down(frame)?,
                _ => {}
            }
        }
        Ok(lagged)
    }

    /// `frame` used to lag and no longer does, so the input meant for the lag run is early.
    fn adjust_up(&mut self, frame: u32) -> Result<(), Error> {
        let lag = self.greenzone.lag();
        let mut count = 1;
        while lag.get(frame + count) == LagState::Lagged {
            count += 1;
        }
        let count = count.min(self.input.frame_count().saturating_sub(frame));
        if count == 0 {
            return Ok(());
        }

        self.input.erase(frame, count);
        self.greenzone.lag_mut().erase_frames(frame, count);
        if self.config.bind_markers_to_input {
            self.markers.erase_frames(frame, count);
        }
        let current = frame + 1;
        if self.input.frame_count() <= current {
            self.input.resize(current + 1);
        }
        self.sync_marker_len();

        let (history, live) = self.history_and_live();
        let first = history.register_adjust_lag(live, frame, -(count as i32));
        let at = match first {
            Some(first) if first < current => first,
            _ if self.greenzone.lag().get(frame) != LagState::NotLagged => frame,
            _ => current,
        };
        tracing::debug!(
            "frame {} stopped lagging, removed {} input frames",
            frame,
            count
        );
        self.after_edit(Some(at))?;
        Ok(())
    }

    /// `frame` started lagging, so the input meant for it belongs one frame later.
    fn adjust_down(&mut self, frame: u32) -> Result<(), Error> {
        if frame >= self.input.frame_count() {
            return Ok(());
        }
        let input = self.input.frame(frame);
        self.input.insert(frame, 1);
        self.input.set_frame(frame, input);
        let lag = self.greenzone.lag_mut();
        lag.insert_frames(frame, LagState::Lagged, 1);
        lag.set(frame + 1, LagState::Unknown);
        if self.config.bind_markers_to_input {
            self.markers.insert_empty(frame, 1);
        }
        self.sync_marker_len();

        let (history, live) = self.history_and_live();
        let first = history.register_adjust_lag(live, frame, 1);
        let at = match first {
            Some(first) if first < frame => first,
            _ => frame,
        };
        tracing::debug!("frame {} started lagging, duplicated its input", frame);
        self.after_edit(Some(at))?;
        Ok(())
    }

    /// Move playback to `frame`, running the engine from the nearest checkpoint.
    pub fn seek(&mut self, frame: u32) -> Result<(), Error> {
        let base = self
            .greenzone
            .nearest_checkpoint(frame)
            .ok_or(Error::MissingCheckpoint { frame })?;
        if self.playback_frame > frame || self.playback_frame < base {
            self.restore_checkpoint(base)?;
        }
        while self.playback_frame < frame {
            self.advance()?;
        }
        Ok(())
    }

    /// Do one unit of background work: evict distant checkpoints, then compress one history
    /// entry or checkpoint.
    ///
    /// Returns true if anything was compressed.
    pub fn idle(&mut self) -> Result<bool, Error> {
        let window = self.config.greenzone_capacity;
        self.greenzone.run_eviction(self.playback_frame, window);
        if self.history.compress_idle()? {
            return Ok(true);
        }
        let protected = self.playback_frame.saturating_sub(window)..self.greenzone.size();
        Ok(self.greenzone.compress_idle(protected)?)
    }

    /// Save the live timeline at the playback frame into a branch slot.
    ///
    /// Returns false if the slot already holds exactly this timeline.
    pub fn set_branch(&mut self, slot: BranchSlot) -> Result<bool, Error> {
        let frame = self.playback_frame;
        let hot_changes = self.config.enable_hot_changes;
        if let Some(existing) = self.branches.slot(slot) {
            if !existing.differs_from_live(&self.input, &self.markers, frame, hot_changes) {
                return Ok(false);
            }
        }
        let checkpoint = match self.greenzone.checkpoint(frame)? {
            Some(state) => state.into_owned(),
            None => self.engine.serialize_state(),
        };
        let live = Live {
            input: &self.input,
            lag: self.greenzone.lag(),
            markers: &self.markers,
        };
        let branch = Branch::capture(
            live,
            hot_changes,
            frame,
            self.history.current().description(),
            checkpoint,
            self.engine.thumbnail(),
        );

        let old_current = self.branches.current();
        let backup = self.branches.replace(slot, Some(branch));
        self.branches.handle_set(slot);
        let (history, live) = self.history_and_live();
        history.register_bookmark_set(live, slot, frame, backup, old_current);
        tracing::debug!("set branch {} at frame {}", slot, frame);
        Ok(true)
    }

    /// Replace the live timeline with the branch in `slot` and move playback to its key
    /// frame.
    pub fn deploy_branch(&mut self, slot: BranchSlot) -> Result<Invalidation, Error> {
        let branch = self
            .branches
            .slot(slot)
            .cloned()
            .ok_or(Error::EmptyBranchSlot(slot))?;
        let key_frame = branch.key_frame();

        let markers_changed = branch.snapshot.markers_differ_from(&self.markers);
        if markers_changed {
            self.markers = branch.snapshot.markers().clone();
        }
        if self.config.branches_restore_entire_movie {
            branch.snapshot.input().write_to(&mut self.input, 0);
        } else {
            branch
                .snapshot
                .input()
                .write_prefix_to(&mut self.input, key_frame);
            let len = self.input.frame_count();
            self.input.insert(len, 1);
        }
        self.sync_marker_len();

        let old_current = self.branches.current();
        let (history, live, _) = self.history_and_live_mut();
        let first = history.register_branching(live, slot, &branch, markers_changed, old_current);
        if let Some(frame) = first {
            self.greenzone.invalidate(frame);
            self.observer.invalidated(frame);
        }
        if !self.greenzone.has_checkpoint(key_frame) && !branch.checkpoint.is_empty() {
            self.greenzone.write_checkpoint(key_frame, branch.checkpoint);
        }
        self.branches.handle_deploy(slot);

        self.restore_nearest(key_frame)?;
        self.seek(key_frame)?;
        tracing::debug!("deployed branch {} at frame {}", slot, key_frame);
        Ok(Invalidation::from_first_difference(first))
    }

    /// Move playback to the key frame of the branch in `slot` without changing the input.
    pub fn jump_to_branch(&mut self, slot: BranchSlot) -> Result<(), Error> {
        let key_frame = self
            .branches
            .slot(slot)
            .ok_or(Error::EmptyBranchSlot(slot))?
            .key_frame();
        self.seek(key_frame)
    }
}

/// Look up a branch slot by its number.
pub fn branch_slot(number: u8) -> Result<BranchSlot, Error> {
    BranchSlot::new(number).ok_or(Error::InvalidBranchSlot(number))
}

#[cfg(test)]
mod test {
    use super::*;
    use tased_log::Movie;

    #[derive(Debug, Default)]
    struct Summing {
        frame: u32,
        sum: u32,
    }

    impl ExecutionEngine for Summing {
        fn serialize_state(&self) -> Vec<u8> {
            let mut state = self.frame.to_le_bytes().to_vec();
            state.extend_from_slice(&self.sum.to_le_bytes());
            state
        }

        fn restore_state(&mut self, state: &[u8]) -> bool {
            if state.len() != 8 {
                return false;
            }
            self.frame = u32::from_le_bytes([state[0], state[1], state[2], state[3]]);
            self.sum = u32::from_le_bytes([state[4], state[5], state[6], state[7]]);
            true
        }

        fn run_frame(&mut self, input: &FrameInput) -> bool {
            self.frame += 1;
            self.sum = self.sum.wrapping_mul(31).wrapping_add(input.joysticks[0].into());
            false
        }
    }

    fn session(frames: u32) -> EditorSession<Movie, Summing> {
        let movie = Movie::from_frames(1, vec![FrameInput::EMPTY; frames as usize]);
        EditorSession::new(TimelineConfig::default(), movie, Summing::default(), ())
    }

    #[test]
    fn test_edit_rewinds_playback() {
        let mut session = session(50);
        session.seek(40).unwrap();
        assert_eq!(session.greenzone().size(), 41);

        let invalidation = session
            .set_frame_input(10, FrameInput::single(3), None)
            .unwrap();
        assert_eq!(invalidation, Invalidation::After(10));
        assert_eq!(session.greenzone().size(), 11);
        assert_eq!(session.playback_frame(), 10);
        assert_eq!(session.engine().frame, 10);
        assert!(session.branches().has_changes_since_current());
    }

    #[test]
    fn test_unchanged_edit_is_ignored() {
        let mut session = session(10);
        let invalidation = session
            .set_frame_input(3, FrameInput::EMPTY, None)
            .unwrap();
        assert_eq!(invalidation, Invalidation::None);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_insert_and_delete_shift_markers() {
        let mut session = session(10);
        assert!(session.set_marker(5));
        let _ = session.insert_frames(2, 3).unwrap();
        assert_eq!(session.input().frame_count(), 13);
        assert_eq!(session.markers().marker_at(8), 1);

        let _ = session.delete_frames(&[0, 1]).unwrap();
        assert_eq!(session.input().frame_count(), 11);
        assert_eq!(session.markers().marker_at(6), 1);
        assert_eq!(session.history().len(), 4);
    }

    #[test]
    fn test_recording_appends() {
        let mut session = session(0);
        for buttons in 1..=4 {
            let _ = session.record_input(FrameInput::single(buttons)).unwrap();
            session.advance().unwrap();
        }
        assert_eq!(session.input().frame_count(), 4);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().current().description(), "Record (1P) 0-3");
        assert_eq!(session.playback_frame(), 4);

        let _ = session.undo().unwrap();
        assert_eq!(session.input().frame_count(), 0);
        assert_eq!(session.playback_frame(), 0);
    }

    #[test]
    fn test_branch_round_trip() {
        let mut session = session(30);
        session.seek(20).unwrap();
        let slot = branch_slot(1).unwrap();
        assert!(session.set_branch(slot).unwrap());
        assert!(!session.set_branch(slot).unwrap());

        let _ = session
            .set_frame_input(5, FrameInput::single(9), None)
            .unwrap();
        let invalidation = session.deploy_branch(slot).unwrap();
        assert_eq!(invalidation, Invalidation::After(5));
        assert_eq!(session.input().frame(5), FrameInput::EMPTY);
        assert_eq!(session.playback_frame(), 20);
        assert_eq!(session.branches().current(), Some(slot));
        assert!(!session.branches().has_changes_since_current());
        assert!(matches!(
            branch_slot(10),
            Err(Error::InvalidBranchSlot(10))
        ));
    }
}
