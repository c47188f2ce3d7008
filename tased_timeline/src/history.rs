use std::{
    collections::VecDeque,
    io::{Read, Write},
};

use tased_log::{
    read_tag, read_u32, read_u8, write_tag, write_u32, write_u8, InputSource, LagLog, LogError,
    MarkerSet, Section, Tag,
};

use crate::{
    Branch, BranchGraph, BranchSlot, ModificationKind, OperationCategory, Snapshot, TimelineConfig,
};

/// Section tag for saved history.
pub const HISTORY_TAG: Tag = *b"HISTORY\0";

/// Read access to the live timeline.
#[derive(Debug)]
pub struct Live<'a, S: ?Sized> {
    /// The live input.
    pub input: &'a S,
    /// The greenzone's lag log.
    pub lag: &'a LagLog,
    /// The live markers.
    pub markers: &'a MarkerSet,
}

// Derived impls would require `S: Copy`.
impl<S: ?Sized> Clone for Live<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for Live<'_, S> {}

/// Write access to the live timeline.
#[derive(Debug)]
pub struct LiveMut<'a, S: ?Sized> {
    /// The live input.
    pub input: &'a mut S,
    /// The greenzone's lag log.
    pub lag: &'a mut LagLog,
    /// The live markers.
    pub markers: &'a mut MarkerSet,
}

impl<'a, S: ?Sized> LiveMut<'a, S> {
    /// Reborrow as read only.
    pub fn as_live(&self) -> Live<'_, S> {
        Live {
            input: &*self.input,
            lag: &*self.lag,
            markers: &*self.markers,
        }
    }
}

/// A description of an input edit that has already been applied to the live timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    /// The kind of edit.
    pub kind: ModificationKind,
    /// The first frame the edit touched.
    pub start: u32,
    /// The last frame the edit touched, or `None` if later frames shifted.
    pub end: Option<u32>,
    /// The number of frames inserted or deleted.
    pub count: u32,
    /// Edits with the same kind and tag as the previous edit are merged into it.
    pub tag: Option<u32>,
    /// Extra text appended to the description.
    pub comment: Option<String>,
    /// The sorted frames inserted or deleted, if not a contiguous run from `start`.
    pub selection: Option<Vec<u32>>,
}

impl ChangeRequest {
    /// An edit that affects `start` and everything after it.
    pub fn new(kind: ModificationKind, start: u32) -> Self {
        Self {
            kind,
            start,
            end: None,
            count: 1,
            tag: None,
            comment: None,
            selection: None,
        }
    }

    /// An edit confined to `start..=end`.
    pub fn span(kind: ModificationKind, start: u32, end: u32) -> Self {
        Self {
            end: Some(end),
            ..Self::new(kind, start)
        }
    }

    /// Set the number of inserted or deleted frames.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Set the coalescing tag.
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Set the comment.
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_owned());
        self
    }

    /// Set the frames inserted or deleted.
    pub fn with_selection(mut self, mut selection: Vec<u32>) -> Self {
        selection.sort_unstable();
        selection.dedup();
        self.count = selection.len() as u32;
        self.selection = Some(selection);
        self
    }

    fn selected_frames(&self) -> Vec<u32> {
        match &self.selection {
            Some(selection) => selection.clone(),
            None => (self.start..self.start.saturating_add(self.count)).collect(),
        }
    }
}

/// One step of history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    snapshot: Snapshot,
    branch_backup: Option<Branch>,
    prior_branch: Option<BranchSlot>,
}

impl HistoryEntry {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            branch_backup: None,
            prior_branch: None,
        }
    }

    /// The timeline after this step.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// For a bookmark step, the slot contents that the step did not leave in the slot.
    ///
    /// While the step is applied this is the overwritten branch; while it is undone it is the
    /// branch that the step saved.
    pub fn branch_backup(&self) -> Option<&Branch> {
        self.branch_backup.as_ref()
    }

    /// The current branch before this step.
    pub fn prior_branch(&self) -> Option<BranchSlot> {
        self.prior_branch
    }
}

fn keys_on_first_change(kind: ModificationKind) -> bool {
    use ModificationKind::*;
    matches!(
        kind,
        Set | Unset | Truncate | Clear | Cut | ScriptChange
    )
}

fn min_frame(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Bring the live lag log in line with `target`.
///
/// If the live log only adds knowledge to `target`, it is kept and truncated where the
/// input starts to differ. Otherwise it is replaced. Returns the first frame whose lag
/// changed, and whether the live log was kept.
fn revert_lag(live: &mut LagLog, target: &LagLog, first_input: Option<u32>) -> (Option<u32>, bool) {
    let conflict = live.find_first_conflict(target);
    if conflict.is_none() && live.len() > target.len() {
        if let Some(frame) = first_input {
            live.invalidate_from(frame);
        }
        (first_input, true)
    } else {
        *live = target.clone();
        (conflict, false)
    }
}

fn record_description(bits: u32, joysticks: usize, start: u32, end: u32) -> String {
    let mut description = ModificationKind::Record.to_string();
    if bits & 1 != 0 {
        description.push_str(" (Commands)");
    }
    for joystick in 0..joysticks {
        if bits & (1 << (joystick + 1)) != 0 {
            description.push_str(&format!(" ({}P)", joystick + 1));
        }
    }
    if end > start {
        description.push_str(&format!(" {}-{}", start, end));
    } else {
        description.push_str(&format!(" {}", start));
    }
    description
}

/// A bounded undo log of snapshots with a cursor.
///
/// Entry 0 is the oldest retained state. When the log is full, appending evicts the oldest
/// entry and the cursor keeps pointing at the same logical entry.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    capacity: usize,
    hot_changes: bool,
    combine_consecutive: bool,
    undo_hint: Option<u32>,
}

impl History {
    /// Create a history holding only `initial`.
    pub fn new(config: &TimelineConfig, initial: Snapshot) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back(HistoryEntry::new(initial));
        Self {
            entries,
            cursor: 0,
            capacity: config.max_undo_levels + 1,
            hot_changes: config.enable_hot_changes,
            combine_consecutive: config.combine_consecutive,
            undo_hint: None,
        }
    }

    /// Discard every entry and start over from `initial`.
    pub fn reset(&mut self, initial: Snapshot) {
        self.entries.clear();
        self.entries.push_back(HistoryEntry::new(initial));
        self.cursor = 0;
        self.undo_hint = None;
    }

    /// Apply new settings, shrinking the log if the undo depth decreased.
    pub fn configure(&mut self, config: &TimelineConfig) {
        self.hot_changes = config.enable_hot_changes;
        self.combine_consecutive = config.combine_consecutive;
        self.resize(config.max_undo_levels);
    }

    /// The maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false, since history holds at least its initial entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The position of the current entry.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The entry at a position.
    pub fn entry(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// The snapshot under the cursor.
    pub fn current(&self) -> &Snapshot {
        &self.entries[self.cursor].snapshot
    }

    /// The key frame of the step most recently undone or redone.
    pub fn undo_hint(&self) -> Option<u32> {
        self.undo_hint
    }

    /// Returns true if the entry at `index` edited `frame`.
    pub fn is_related(&self, index: usize, frame: u32) -> bool {
        self.entries.get(index).map_or(false, |entry| {
            let snapshot = &entry.snapshot;
            snapshot.kind.category() != OperationCategory::Other
                && frame >= snapshot.start_frame
                && snapshot.end_frame.map_or(true, |end| frame <= end)
        })
    }

    fn would_coalesce(&self, candidate: &Snapshot) -> bool {
        let current = self.current();
        self.combine_consecutive
            && self.cursor > 0
            && candidate.tag.is_some()
            && current.tag == candidate.tag
            && current.kind == candidate.kind
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Append `candidate` after the cursor, or merge it into the current entry if both are
    /// part of one continuous action.
    ///
    /// Either way, entries after the cursor are discarded. Returns true if the candidate was
    /// merged.
    pub fn append_or_coalesce(&mut self, mut candidate: Snapshot) -> bool {
        if self.would_coalesce(&candidate) {
            let current = self.current();
            candidate.key_frame = candidate.key_frame.min(current.key_frame);
            candidate.start_frame = candidate.start_frame.min(current.start_frame);
            candidate.end_frame = match (candidate.end_frame, current.end_frame) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
            candidate.describe();
            self.entries.truncate(self.cursor + 1);
            self.entries[self.cursor].snapshot = candidate;
            true
        } else {
            self.push(HistoryEntry::new(candidate));
            false
        }
    }

    fn inherit_hot_changes(
        &self,
        snapshot: &mut Snapshot,
        request: &ChangeRequest,
        first: u32,
        coalesce: bool,
    ) {
        let previous = self.current().input();
        let input = &mut snapshot.input;
        let end = request.end.unwrap_or(u32::MAX);
        if coalesce {
            input.copy_hot_changes(previous);
            input.fill_hot_changes(previous, first..=end);
            return;
        }
        match request.kind {
            ModificationKind::InsertNum => {
                input.inherit_hot_changes_insert_num(previous, request.start, request.count, true)
            }
            ModificationKind::Insert | ModificationKind::PasteInsert | ModificationKind::Clone => {
                input.inherit_hot_changes_insert_selection(previous, &request.selected_frames())
            }
            ModificationKind::Delete => {
                input.inherit_hot_changes_delete_selection(previous, &request.selected_frames())
            }
            ModificationKind::Truncate => input.inherit_hot_changes(previous),
            _ => {
                input.inherit_hot_changes(previous);
                input.fill_hot_changes(previous, first..=end);
            }
        }
    }

    /// Record an input edit.
    ///
    /// Returns the first frame where the live input differs from the current entry, or `None`
    /// if nothing changed (in which case nothing is recorded). For edits without a closed
    /// end, a lag conflict at an earlier frame takes priority.
    pub fn register_changes<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        request: &ChangeRequest,
    ) -> Option<u32> {
        let current = self.current();
        let first = match request.end {
            Some(end) => current
                .input()
                .find_first_difference_in(live.input, request.start..=end),
            None => current
                .input()
                .find_first_difference_in(live.input, request.start..),
        }?;
        let lag_first = match request.end {
            Some(_) => None,
            None => live.lag.find_first_conflict(current.lag()),
        };

        let mut snapshot = Snapshot::capture(live.input, live.lag, live.markers, self.hot_changes);
        snapshot.kind = request.kind;
        snapshot.key_frame = if keys_on_first_change(request.kind) {
            first
        } else {
            request.start
        };
        snapshot.start_frame = request.start;
        snapshot.end_frame = match request.kind {
            ModificationKind::InsertNum => {
                Some(request.start + request.count.saturating_sub(1))
            }
            _ => request.end,
        };
        snapshot.tag = request.tag;
        snapshot.comment = request.comment.clone();
        snapshot.describe();

        let coalesce = self.would_coalesce(&snapshot);
        if self.hot_changes {
            self.inherit_hot_changes(&mut snapshot, request, first, coalesce);
        }
        self.append_or_coalesce(snapshot);
        min_frame(Some(first), lag_first)
    }

    /// Fold an automatic lag adjustment into the current entry.
    ///
    /// `delta` frames were inserted (positive) or deleted (negative) at `start`. History is
    /// not lengthened and later entries are kept. Returns the first changed frame.
    pub fn register_adjust_lag<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        start: u32,
        delta: i32,
    ) -> Option<u32> {
        let current = self.current();
        let first = current.input().find_first_difference_in(live.input, start..)?;

        let mut snapshot = Snapshot::capture(live.input, live.lag, live.markers, self.hot_changes);
        snapshot.key_frame = current.key_frame;
        snapshot.start_frame = current.start_frame;
        snapshot.end_frame = current.end_frame;
        snapshot.kind = current.kind;
        snapshot.tag = current.tag;
        snapshot.recorded_joypads = current.recorded_joypads;
        snapshot.comment = current.comment.clone();
        snapshot.set_description(current.description.clone());
        if self.hot_changes {
            let count = delta.unsigned_abs();
            if delta < 0 {
                snapshot
                    .input
                    .inherit_hot_changes_delete_num(current.input(), start, count, false);
            } else {
                snapshot
                    .input
                    .inherit_hot_changes_insert_num(current.input(), start, count, false);
            }
        }
        self.entries[self.cursor].snapshot = snapshot;
        Some(first)
    }

    /// Record a marker edit. Returns false if the markers did not change.
    pub fn register_markers_change<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        kind: ModificationKind,
        start: u32,
        end: Option<u32>,
        comment: Option<&str>,
    ) -> bool {
        let current = self.current();
        if !current.markers_differ_from(live.markers) {
            return false;
        }
        let mut snapshot = Snapshot::capture(live.input, live.lag, live.markers, self.hot_changes);
        snapshot.kind = kind;
        snapshot.key_frame = start;
        snapshot.start_frame = start;
        snapshot.end_frame = end;
        snapshot.comment = comment.map(str::to_owned);
        snapshot.describe();
        if self.hot_changes {
            snapshot.input.copy_hot_changes(current.input());
        }
        self.push(HistoryEntry::new(snapshot));
        true
    }

    /// Record that a branch was saved into `slot`.
    ///
    /// `backup` is the slot's previous contents and `prior_branch` the current branch before
    /// the save, so the step can be undone.
    pub fn register_bookmark_set<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        slot: BranchSlot,
        key_frame: u32,
        backup: Option<Branch>,
        prior_branch: Option<BranchSlot>,
    ) {
        let mut snapshot = Snapshot::capture(live.input, live.lag, live.markers, self.hot_changes);
        snapshot.kind = ModificationKind::Bookmark(slot);
        snapshot.key_frame = key_frame;
        snapshot.start_frame = key_frame;
        snapshot.end_frame = Some(key_frame);
        snapshot.describe();
        if self.hot_changes {
            snapshot.input.copy_hot_changes(self.current().input());
        }
        self.push(HistoryEntry {
            snapshot,
            branch_backup: backup,
            prior_branch,
        });
    }

    /// Record that `branch` (from `slot`) was deployed onto the live timeline.
    ///
    /// The live input and markers must already hold the branch's contents. The live lag log
    /// is reverted to the branch's lag log here. Returns the first frame whose cached state
    /// is no longer valid.
    pub fn register_branching<S: InputSource + ?Sized>(
        &mut self,
        live: LiveMut<'_, S>,
        slot: BranchSlot,
        branch: &Branch,
        markers_changed: bool,
        prior_branch: Option<BranchSlot>,
    ) -> Option<u32> {
        let first_input = self
            .current()
            .input()
            .find_first_difference_in(&*live.input, ..);
        let (lag_first, _) = revert_lag(live.lag, branch.snapshot.lag(), first_input);

        let mut snapshot =
            Snapshot::capture(&*live.input, &*live.lag, &*live.markers, self.hot_changes);
        if let Some(first) = first_input {
            snapshot.kind = ModificationKind::Branch(slot);
            snapshot.key_frame = first;
            snapshot.start_frame = first;
            snapshot.end_frame = None;
            if self.hot_changes {
                snapshot.input.copy_hot_changes(branch.snapshot.input());
            }
        } else if markers_changed {
            snapshot.kind = ModificationKind::MarkerBranch(slot);
            snapshot.key_frame = branch.key_frame();
            snapshot.start_frame = 0;
            snapshot.end_frame = None;
            if self.hot_changes {
                snapshot.input.copy_hot_changes(self.current().input());
            }
        }
        if first_input.is_some() || markers_changed {
            let description = format!("{}{}", snapshot.kind, branch.snapshot.description());
            snapshot.set_description(description);
            self.push(HistoryEntry {
                snapshot,
                branch_backup: None,
                prior_branch,
            });
        }
        min_frame(first_input, lag_first)
    }

    /// Record that input was recorded on `frame`.
    ///
    /// `joypad_bits` describes which parts of the input changed, as produced by
    /// [tased_log::FrameInput::difference_bits]. Recording on the frame right after the
    /// current recording entry, with the same joypads, extends that entry in place.
    pub fn register_recording<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        frame: u32,
        joypad_bits: u32,
    ) {
        let joysticks = live.input.joysticks_per_frame();
        let current = self.current();
        let consecutive = self.combine_consecutive
            && current.kind == ModificationKind::Record
            && frame > 0
            && current.tag == Some(frame - 1)
            && current.recorded_joypads == joypad_bits;

        if consecutive {
            let cursor = self.cursor;
            self.entries.truncate(cursor + 1);
            let snapshot = &mut self.entries[cursor].snapshot;
            snapshot.reinit_single_frame(live.input, live.lag, live.markers, frame);
            snapshot.end_frame = Some(frame);
            snapshot.tag = Some(frame);
            let description =
                record_description(joypad_bits, joysticks, snapshot.start_frame, frame);
            snapshot.set_description(description);
        } else {
            let mut snapshot =
                Snapshot::capture(live.input, live.lag, live.markers, self.hot_changes);
            snapshot.kind = ModificationKind::Record;
            snapshot.recorded_joypads = joypad_bits;
            snapshot.key_frame = frame;
            snapshot.start_frame = frame;
            snapshot.end_frame = Some(frame);
            snapshot.tag = Some(frame);
            snapshot.set_description(record_description(joypad_bits, joysticks, frame, frame));
            if self.hot_changes {
                snapshot.input.inherit_hot_changes(current.input());
                snapshot.input.fill_hot_changes(current.input(), frame..=frame);
            }
            self.push(HistoryEntry::new(snapshot));
        }
    }

    /// Record that the live input was replaced by an imported movie.
    pub fn register_import<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        name: &str,
    ) -> Option<u32> {
        let current = self.current();
        let first = current.input().find_first_difference_in(live.input, ..)?;
        let mut snapshot = Snapshot::capture(live.input, live.lag, live.markers, self.hot_changes);
        snapshot.kind = ModificationKind::Import;
        snapshot.key_frame = first;
        snapshot.start_frame = 0;
        snapshot.end_frame = Some(live.input.frame_count().saturating_sub(1));
        snapshot.comment = Some(name.to_owned());
        snapshot.describe();
        if self.hot_changes {
            snapshot.input.inherit_hot_changes(current.input());
            snapshot.input.fill_hot_changes(current.input(), ..);
        }
        self.push(HistoryEntry::new(snapshot));
        Some(first)
    }

    /// Record edits made by a script, named `name`, starting at `start`.
    pub fn register_script_changes<S: InputSource + ?Sized>(
        &mut self,
        live: Live<'_, S>,
        name: &str,
        start: u32,
        insertion_or_deletion: bool,
    ) -> Option<u32> {
        let mut request = ChangeRequest::new(ModificationKind::ScriptChange, start);
        if !insertion_or_deletion {
            request.end = Some(live.input.frame_count().saturating_sub(1).max(start));
        }
        if !name.is_empty() {
            request.comment = Some(name.to_owned());
        }
        self.register_changes(live, &request)
    }

    /// Step back one entry. See [History::jump_to].
    pub fn undo<S: InputSource + ?Sized>(
        &mut self,
        live: LiveMut<'_, S>,
        branches: &mut BranchGraph,
    ) -> Option<u32> {
        let target = self.cursor.saturating_sub(1);
        self.jump_to(target, live, branches)
    }

    /// Step forward one entry. See [History::jump_to].
    pub fn redo<S: InputSource + ?Sized>(
        &mut self,
        live: LiveMut<'_, S>,
        branches: &mut BranchGraph,
    ) -> Option<u32> {
        let target = self.cursor + 1;
        self.jump_to(target, live, branches)
    }

    /// Move the cursor to `position` (clamped) and make the live timeline match it.
    ///
    /// Every bookmark step between the old and new position is replayed in order, swapping
    /// branch slots with their backups and restoring the current branch. Only the differing
    /// tail of the input is rewritten. Returns the earliest frame whose cached state is no
    /// longer valid, or `None` if nothing changed.
    pub fn jump_to<S: InputSource + ?Sized>(
        &mut self,
        position: usize,
        live: LiveMut<'_, S>,
        branches: &mut BranchGraph,
    ) -> Option<u32> {
        let target = position.min(self.entries.len() - 1);
        if target == self.cursor {
            return None;
        }
        let old = self.cursor;
        self.cursor = target;

        let old_current = branches.current();
        let old_changes = branches.has_changes_since_current();
        let mut current_branch = old_current;
        let mut changes = false;
        let mut bookmarks_changed = false;

        if target > old {
            for index in old + 1..=target {
                let entry = &mut self.entries[index];
                match entry.snapshot.kind.branch_slot() {
                    Some(slot) => {
                        current_branch = Some(slot);
                        changes = false;
                    }
                    None => changes = true,
                }
                if let ModificationKind::Bookmark(slot) = entry.snapshot.kind {
                    let restored = entry.branch_backup.take();
                    entry.branch_backup = branches.replace(slot, restored);
                    bookmarks_changed = true;
                }
            }
            self.undo_hint = Some(self.entries[target].snapshot.key_frame);
        } else {
            for index in (target + 1..=old).rev() {
                let entry = &mut self.entries[index];
                if entry.snapshot.kind.branch_slot().is_some() {
                    current_branch = entry.prior_branch;
                }
                if let ModificationKind::Bookmark(slot) = entry.snapshot.kind {
                    let restored = entry.branch_backup.take();
                    entry.branch_backup = branches.replace(slot, restored);
                    bookmarks_changed = true;
                }
            }
            let kind = self.entries[target].snapshot.kind;
            match kind.branch_slot() {
                Some(slot) => {
                    current_branch = Some(slot);
                    changes = false;
                }
                None if kind.category() != OperationCategory::Other => changes = true,
                None => {}
            }
            self.undo_hint = Some(self.entries[target + 1].snapshot.key_frame);
        }
        if bookmarks_changed || current_branch != old_current || changes != old_changes {
            branches.handle_history_jump(current_branch, changes);
        }

        let snapshot = &mut self.entries[target].snapshot;
        if snapshot.markers_differ_from(live.markers) {
            *live.markers = snapshot.markers().clone();
        }
        let first_input = snapshot.input().find_first_difference_in(&*live.input, ..);
        if let Some(frame) = first_input {
            snapshot.input().write_to(live.input, frame);
        }
        let (lag_first, kept) = revert_lag(live.lag, snapshot.lag(), first_input);
        if kept {
            *snapshot.lag_mut() = live.lag.clone();
        }
        tracing::debug!(
            "history jump {} -> {}: input {:?}, lag {:?}",
            old,
            target,
            first_input,
            lag_first
        );
        min_frame(first_input, lag_first)
    }

    /// Change the undo depth.
    ///
    /// If entries must be dropped, redo entries go first, then the oldest entries.
    pub fn resize(&mut self, max_undo_levels: usize) {
        self.capacity = max_undo_levels + 1;
        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let redo = self.entries.len() - 1 - self.cursor;
        let dropped_redo = excess.min(redo);
        self.entries.truncate(self.entries.len() - dropped_redo);
        let dropped_undo = excess - dropped_redo;
        self.entries.drain(..dropped_undo);
        self.cursor -= dropped_undo;
    }

    /// Pack the save cache of one entry behind the cursor, returning true if any work was
    /// done.
    ///
    /// This makes the next save faster. It does not reduce memory use.
    pub fn compress_idle(&mut self) -> Result<bool, LogError> {
        for entry in self.entries.range_mut(..self.cursor) {
            if !entry.snapshot.is_packed() {
                return entry.snapshot.pack();
            }
        }
        Ok(false)
    }

    /// Write the history, or a skip marker if `present` is false.
    pub fn save<W: Write>(&self, writer: &mut W, present: bool) -> Result<(), LogError> {
        write_tag(writer, HISTORY_TAG, present)?;
        if !present {
            return Ok(());
        }
        write_u32(writer, self.cursor as u32)?;
        write_u32(writer, self.entries.len() as u32)?;
        for entry in &self.entries {
            entry.snapshot.save(writer)?;
            Branch::save_optional(entry.branch_backup.as_ref(), writer)?;
            write_u8(writer, BranchSlot::to_byte(entry.prior_branch))?;
        }
        Ok(())
    }

    /// Read history written by [History::save].
    ///
    /// Returns `None` if the section was skipped. If the saved history is longer than the
    /// configured capacity, redo entries are dropped first, then the oldest entries.
    pub fn load<R: Read>(reader: &mut R, config: &TimelineConfig) -> Result<Option<Self>, LogError> {
        if read_tag(reader, HISTORY_TAG)? == Section::Skipped {
            return Ok(None);
        }
        let cursor = read_u32(reader)? as usize;
        let total = read_u32(reader)? as usize;
        if total == 0 || cursor >= total {
            return Err(LogError::InvalidData("history cursor out of range"));
        }
        let mut entries = VecDeque::new();
        for _ in 0..total {
            let snapshot = Snapshot::load(reader)?;
            let branch_backup = Branch::load_optional(reader)?;
            let prior_branch = BranchSlot::from_byte(read_u8(reader)?)?;
            entries.push_back(HistoryEntry {
                snapshot,
                branch_backup,
                prior_branch,
            });
        }
        let mut history = Self {
            entries,
            cursor,
            capacity: total,
            hot_changes: config.enable_hot_changes,
            combine_consecutive: config.combine_consecutive,
            undo_hint: None,
        };
        history.resize(config.max_undo_levels);
        Ok(Some(history))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tased_log::{FrameInput, LagState, Movie};

    struct Fixture {
        movie: Movie,
        lag: LagLog,
        markers: MarkerSet,
        branches: BranchGraph,
        history: History,
    }

    impl Fixture {
        fn new(frames: u32, undo_levels: usize) -> Self {
            let movie = Movie::from_frames(1, vec![FrameInput::EMPTY; frames as usize]);
            let mut lag = LagLog::new();
            for frame in 0..frames {
                lag.set(frame, LagState::NotLagged);
            }
            let mut markers = MarkerSet::new();
            markers.resize(frames);
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

        fn live(&self) -> Live<'_, Movie> {
            Live {
                input: &self.movie,
                lag: &self.lag,
                markers: &self.markers,
            }
        }

        fn set(&mut self, frame: u32, buttons: u8) -> Option<u32> {
            self.movie.set_frame(frame, FrameInput::single(buttons));
            let request = ChangeRequest::span(ModificationKind::Set, frame, frame);
            let live = Live {
                input: &self.movie,
                lag: &self.lag,
                markers: &self.markers,
            };
            self.history.register_changes(live, &request)
        }

        fn undo(&mut self) -> Option<u32> {
            let live = LiveMut {
                input: &mut self.movie,
                lag: &mut self.lag,
                markers: &mut self.markers,
            };
            self.history.undo(live, &mut self.branches)
        }

        fn redo(&mut self) -> Option<u32> {
            let live = LiveMut {
                input: &mut self.movie,
                lag: &mut self.lag,
                markers: &mut self.markers,
            };
            self.history.redo(live, &mut self.branches)
        }
    }

    #[test]
    fn test_no_change_records_nothing() {
        let mut fixture = Fixture::new(10, 10);
        let request = ChangeRequest::span(ModificationKind::Set, 3, 3);
        let live = Live {
            input: &fixture.movie,
            lag: &fixture.lag,
            markers: &fixture.markers,
        };
        assert_eq!(fixture.history.register_changes(live, &request), None);
        assert_eq!(fixture.history.len(), 1);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut fixture = Fixture::new(100, 10);
        assert_eq!(fixture.set(20, 1), Some(20));
        assert_eq!(fixture.set(40, 2), Some(40));
        let after = fixture.movie.clone();

        assert_eq!(fixture.undo(), Some(40));
        assert_eq!(fixture.movie.frame(40), FrameInput::EMPTY);
        assert_eq!(fixture.undo(), Some(20));
        assert_eq!(fixture.undo(), None);
        assert_eq!(fixture.history.cursor(), 0);

        assert_eq!(fixture.redo(), Some(20));
        assert_eq!(fixture.redo(), Some(40));
        assert_eq!(fixture.redo(), None);
        assert_eq!(fixture.movie, after);
        assert_eq!(fixture.history.undo_hint(), Some(40));
    }

    #[test]
    fn test_new_edit_discards_redo() {
        let mut fixture = Fixture::new(50, 10);
        fixture.set(1, 1);
        fixture.set(2, 1);
        fixture.undo();
        fixture.set(3, 1);
        assert_eq!(fixture.history.len(), 3);
        assert_eq!(fixture.history.current().start_frame(), 3);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut fixture = Fixture::new(50, 3);
        for frame in 0..10 {
            fixture.set(frame, 1);
            assert!(fixture.history.len() <= 4);
        }
        assert_eq!(fixture.history.len(), 4);
        assert_eq!(fixture.history.cursor(), 3);
        assert_eq!(fixture.history.entry(0).unwrap().snapshot().start_frame(), 6);
        fixture.undo();
        assert_eq!(fixture.history.cursor(), 2);
    }

    #[test]
    fn test_drag_coalesces() {
        let mut fixture = Fixture::new(50, 10);
        for frame in 5..9 {
            fixture.movie.set_frame(frame, FrameInput::single(1));
            let request = ChangeRequest::span(ModificationKind::Set, frame, frame).with_tag(77);
            let live = Live {
                input: &fixture.movie,
                lag: &fixture.lag,
                markers: &fixture.markers,
            };
            assert_eq!(fixture.history.register_changes(live, &request), Some(frame));
        }
        assert_eq!(fixture.history.len(), 2);
        let current = fixture.history.current();
        assert_eq!(current.start_frame(), 5);
        assert_eq!(current.end_frame(), Some(8));
        assert_eq!(current.description(), "Set 5-8");
        assert_eq!(current.input().hot_change(8, 0, 0), 15);

        assert_eq!(fixture.undo(), Some(5));
        assert_eq!(fixture.movie.frame(7), FrameInput::EMPTY);
    }

    #[test]
    fn test_consecutive_recording() {
        let mut fixture = Fixture::new(0, 10);
        for frame in 0..5 {
            fixture.movie.push(FrameInput::single(2));
            fixture.lag.set(frame, LagState::NotLagged);
            let live = Live {
                input: &fixture.movie,
                lag: &fixture.lag,
                markers: &fixture.markers,
            };
            fixture.history.register_recording(live, frame, 0b10);
        }
        assert_eq!(fixture.history.len(), 2);
        assert_eq!(fixture.history.current().description(), "Record (1P) 0-4");
        assert_eq!(fixture.history.current().input().len(), 5);

        fixture.undo();
        assert_eq!(fixture.movie.frame_count(), 0);
        fixture.redo();
        assert_eq!(fixture.movie.frame(4), FrameInput::single(2));
    }

    #[test]
    fn test_lag_conflict_takes_priority() {
        let mut fixture = Fixture::new(50, 10);
        fixture.lag.set(10, LagState::Lagged);
        fixture.movie.erase(30, 1);
        let request = ChangeRequest::new(ModificationKind::Delete, 30).with_count(1);
        let live = Live {
            input: &fixture.movie,
            lag: &fixture.lag,
            markers: &fixture.markers,
        };
        assert_eq!(fixture.history.register_changes(live, &request), Some(10));
    }

    #[test]
    fn test_resize_drops_redo_first() {
        let mut fixture = Fixture::new(50, 10);
        for frame in 0..6 {
            fixture.set(frame, 1);
        }
        fixture.undo();
        fixture.undo();
        assert_eq!(fixture.history.cursor(), 4);
        fixture.history.resize(2);
        assert_eq!(fixture.history.len(), 3);
        assert_eq!(fixture.history.cursor(), 2);
        assert_eq!(fixture.history.current().start_frame(), 3);
    }

    #[test]
    fn test_save_load_and_compress() {
        let mut fixture = Fixture::new(20, 10);
        fixture.set(1, 1);
        fixture.set(2, 1);
        assert!(fixture.history.compress_idle().unwrap());
        assert!(fixture.history.compress_idle().unwrap());
        assert!(!fixture.history.compress_idle().unwrap());

        let mut buf = Vec::new();
        fixture.history.save(&mut buf, true).unwrap();
        let config = TimelineConfig {
            max_undo_levels: 1,
            ..TimelineConfig::default()
        };
        let loaded = History::load(&mut &buf[..], &config).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.cursor(), 1);
        assert_eq!(loaded.current().start_frame(), 2);

        let mut skipped = Vec::new();
        fixture.history.save(&mut skipped, false).unwrap();
        assert!(History::load(&mut &skipped[..], &config).unwrap().is_none());
        assert!(History::load(&mut &buf[..40], &config).is_err());
    }
}
