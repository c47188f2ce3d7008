use std::{
    fmt,
    io::{Read, Write},
};

use tased_log::{
    read_blob, read_opt_u32, read_str, read_tag, read_u8, write_blob, write_opt_u32, write_str,
    write_tag, write_u8, InputSource, LogError, MarkerSet, Section, Tag,
};

use crate::{Live, Snapshot};

/// Section tag for saved branches.
pub const BRANCHES_TAG: Tag = *b"BOOKMARK";

const NO_SLOT: u8 = 0xff;

/// One of the ten branch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchSlot(u8);

impl BranchSlot {
    /// The number of slots.
    pub const COUNT: usize = 10;

    /// Return the slot with the given number, if it is in range.
    pub fn new(number: u8) -> Option<Self> {
        if (number as usize) < Self::COUNT {
            Some(Self(number))
        } else {
            None
        }
    }

    /// The slot number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// The slot number as an array index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Every slot, in ascending order.
    pub fn all() -> impl DoubleEndedIterator<Item = BranchSlot> {
        (0..Self::COUNT as u8).map(Self)
    }

    pub(crate) fn to_byte(slot: Option<BranchSlot>) -> u8 {
        slot.map_or(NO_SLOT, BranchSlot::number)
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Option<BranchSlot>, LogError> {
        match byte {
            NO_SLOT => Ok(None),
            number => Self::new(number)
                .map(Some)
                .ok_or(LogError::InvalidData("bad branch slot")),
        }
    }
}

impl fmt::Display for BranchSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parent of a branch in the branch forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parent {
    /// The implicit root that every tree hangs from.
    Cloud,
    /// Another branch slot.
    Slot(BranchSlot),
}

impl Parent {
    fn slot(self) -> Option<BranchSlot> {
        match self {
            Parent::Cloud => None,
            Parent::Slot(slot) => Some(slot),
        }
    }
}

/// A saved point in time: the timeline at that point, the machine state, and a preview.
#[derive(Debug, Clone)]
pub struct Branch {
    /// The logs and metadata. The snapshot's key frame is the frame the branch was set on.
    pub snapshot: Snapshot,
    /// The machine state at the key frame.
    pub checkpoint: Vec<u8>,
    /// A preview image, possibly empty.
    pub thumbnail: Vec<u8>,
}

impl Branch {
    /// Capture the live timeline as a branch set on `key_frame`.
    pub fn capture<S: InputSource + ?Sized>(
        live: Live<'_, S>,
        hot_changes: bool,
        key_frame: u32,
        description: &str,
        checkpoint: Vec<u8>,
        thumbnail: Vec<u8>,
    ) -> Self {
        let mut snapshot = Snapshot::capture(live.input, live.lag, live.markers, hot_changes);
        snapshot.key_frame = key_frame;
        snapshot.start_frame = key_frame;
        snapshot.set_description(description.to_owned());
        Self {
            snapshot,
            checkpoint,
            thumbnail,
        }
    }

    /// The frame the branch was set on.
    pub fn key_frame(&self) -> u32 {
        self.snapshot.key_frame()
    }

    /// Returns true if saving the live timeline into this slot would change anything.
    pub fn differs_from_live<S: InputSource + ?Sized>(
        &self,
        input: &S,
        markers: &MarkerSet,
        frame: u32,
        hot_changes: bool,
    ) -> bool {
        self.key_frame() != frame
            || self.snapshot.input().has_hot_changes() != hot_changes
            || self.snapshot.markers_differ_from(markers)
            || self
                .snapshot
                .input()
                .find_first_difference_in(input, ..)
                .is_some()
    }

    fn save<W: Write>(&self, writer: &mut W) -> Result<(), LogError> {
        self.snapshot.save(writer)?;
        write_blob(writer, &self.checkpoint)?;
        write_blob(writer, &self.thumbnail)
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self, LogError> {
        Ok(Self {
            snapshot: Snapshot::load(reader)?,
            checkpoint: read_blob(reader)?,
            thumbnail: read_blob(reader)?,
        })
    }

    /// Write an optional branch, as stored in a slot or a history backup.
    pub fn save_optional<W: Write>(
        branch: Option<&Branch>,
        writer: &mut W,
    ) -> Result<(), LogError> {
        match branch {
            Some(branch) => {
                write_u8(writer, 1)?;
                branch.save(writer)
            }
            None => Ok(write_u8(writer, 0)?),
        }
    }

    /// Read a value written by [Branch::save_optional].
    pub fn load_optional<R: Read>(reader: &mut R) -> Result<Option<Branch>, LogError> {
        match read_u8(reader)? {
            0 => Ok(None),
            1 => Ok(Some(Branch::load(reader)?)),
            _ => Err(LogError::InvalidData("bad branch presence flag")),
        }
    }
}

/// The ten branch slots and the forest of relations between them.
///
/// Relations are derived from the slots' input logs and computed lazily. Pairwise first
/// differences are memoized, and overwriting a slot forgets only that slot's row and column.
#[derive(Debug, Clone)]
pub struct BranchGraph {
    slots: [Option<Branch>; BranchSlot::COUNT],
    current: Option<BranchSlot>,
    changes_since_current: bool,
    first_differences: [[Option<u32>; BranchSlot::COUNT]; BranchSlot::COUNT],
    parents: Option<[Parent; BranchSlot::COUNT]>,
    fullest_timelines: [Option<BranchSlot>; BranchSlot::COUNT],
    cloud_timestamp: String,
    current_timestamp: String,
}

fn now_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

impl Default for BranchGraph {
    fn default() -> Self {
        let timestamp = now_timestamp();
        Self {
            slots: Default::default(),
            current: None,
            changes_since_current: false,
            first_differences: [[None; BranchSlot::COUNT]; BranchSlot::COUNT],
            parents: None,
            fullest_timelines: [None; BranchSlot::COUNT],
            cloud_timestamp: timestamp.clone(),
            current_timestamp: timestamp,
        }
    }
}

impl BranchGraph {
    /// Create a graph with every slot empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// The branch in a slot.
    pub fn slot(&self, slot: BranchSlot) -> Option<&Branch> {
        self.slots[slot.index()].as_ref()
    }

    /// The occupied slots, in ascending order.
    pub fn occupied(&self) -> impl Iterator<Item = BranchSlot> + '_ {
        BranchSlot::all().filter(move |&slot| self.slots[slot.index()].is_some())
    }

    /// Replace the contents of a slot and return the previous contents.
    pub fn replace(&mut self, slot: BranchSlot, branch: Option<Branch>) -> Option<Branch> {
        let previous = std::mem::replace(&mut self.slots[slot.index()], branch);
        self.invalidate_relations_of(slot);
        previous
    }

    /// The slot the live timeline descends from, if any.
    pub fn current(&self) -> Option<BranchSlot> {
        self.current
    }

    /// Returns true if the live timeline was edited since the current branch was set or
    /// deployed.
    pub fn has_changes_since_current(&self) -> bool {
        self.changes_since_current
    }

    /// The time the project was loaded or reset.
    pub fn cloud_timestamp(&self) -> &str {
        &self.cloud_timestamp
    }

    /// The time of the last edit since the current branch.
    pub fn current_timestamp(&self) -> &str {
        &self.current_timestamp
    }

    /// Forget cached relations involving `slot`.
    pub fn invalidate_relations_of(&mut self, slot: BranchSlot) {
        for row in &mut self.first_differences {
            row[slot.index()] = None;
        }
        self.first_differences[slot.index()] = [None; BranchSlot::COUNT];
        self.parents = None;
        self.fullest_timelines = [None; BranchSlot::COUNT];
    }

    /// A branch was saved into `slot`.
    pub fn handle_set(&mut self, slot: BranchSlot) {
        self.invalidate_relations_of(slot);
        self.current = Some(slot);
        self.changes_since_current = false;
    }

    /// A branch was deployed from `slot`.
    pub fn handle_deploy(&mut self, slot: BranchSlot) {
        self.current = Some(slot);
        self.changes_since_current = false;
    }

    /// History moved, restoring the given branch bookkeeping.
    pub fn handle_history_jump(&mut self, current: Option<BranchSlot>, changes: bool) {
        self.parents = None;
        self.fullest_timelines = [None; BranchSlot::COUNT];
        self.current = current;
        self.changes_since_current = changes;
        if changes {
            self.current_timestamp = now_timestamp();
        }
    }

    /// The live timeline was edited.
    pub fn mark_dirty(&mut self) {
        self.changes_since_current = true;
        self.current_timestamp = now_timestamp();
    }

    /// The first frame where two slots' inputs differ.
    ///
    /// A slot compared with itself yields its length, as does a pair with no difference.
    /// A pair involving an empty slot yields 0.
    pub fn first_difference(&mut self, a: BranchSlot, b: BranchSlot) -> u32 {
        let (branch_a, branch_b) = match (self.slot(a), self.slot(b)) {
            (Some(branch_a), Some(branch_b)) => (branch_a, branch_b),
            _ => return 0,
        };
        let len = branch_a.snapshot.input().len();
        if a == b {
            return len;
        }
        if let Some(frame) = self.first_differences[a.index()][b.index()] {
            return frame;
        }
        let frame = branch_a
            .snapshot
            .input()
            .find_first_difference(branch_b.snapshot.input(), ..)
            .unwrap_or(len);
        self.first_differences[a.index()][b.index()] = Some(frame);
        self.first_differences[b.index()][a.index()] = Some(frame);
        frame
    }

    fn key_frame(&self, slot: BranchSlot) -> u32 {
        self.slot(slot).map_or(0, Branch::key_frame)
    }

    fn is_descendant(
        parents: &[Parent; BranchSlot::COUNT],
        node: BranchSlot,
        ancestor: BranchSlot,
    ) -> bool {
        let mut parent = parents[node.index()];
        for _ in 0..BranchSlot::COUNT {
            match parent {
                Parent::Cloud => return false,
                Parent::Slot(slot) if slot == ancestor => return true,
                Parent::Slot(slot) => parent = parents[slot.index()],
            }
        }
        false
    }

    fn recalculate_parents(&mut self) -> [Parent; BranchSlot::COUNT] {
        let mut parents = [Parent::Cloud; BranchSlot::COUNT];
        let occupied: Vec<BranchSlot> = self.occupied().collect();
        for &slot in &occupied {
            let key_frame = self.key_frame(slot);
            let mut best: Option<(u32, u32, BranchSlot)> = None;
            for &candidate in occupied.iter().rev() {
                let candidate_key = self.key_frame(candidate);
                if candidate == slot || candidate_key > key_frame {
                    continue;
                }
                let distance = self.first_difference(candidate, slot);
                if distance < candidate_key || Self::is_descendant(&parents, candidate, slot) {
                    continue;
                }
                let rank = (candidate_key, distance, candidate);
                if best.map_or(true, |best| rank > best) {
                    best = Some(rank);
                }
            }
            if let Some((_, _, parent)) = best {
                parents[slot.index()] = Parent::Slot(parent);
            }
        }
        parents
    }

    fn parents(&mut self) -> [Parent; BranchSlot::COUNT] {
        match self.parents {
            Some(parents) => parents,
            None => {
                let parents = self.recalculate_parents();
                self.parents = Some(parents);
                parents
            }
        }
    }

    /// The parent of a slot in the branch forest.
    ///
    /// The parent is the occupied slot whose timeline is a prefix of this slot's timeline up
    /// to its own key frame, preferring the greatest key frame, then the longest shared
    /// prefix, then the highest slot number. Empty slots hang from the cloud.
    pub fn resolve_parent(&mut self, slot: BranchSlot) -> Parent {
        if self.slot(slot).is_none() {
            return Parent::Cloud;
        }
        self.parents()[slot.index()]
    }

    /// The descendant of `slot` that extends its timeline the furthest, or `slot` itself.
    pub fn resolve_fullest_timeline(&mut self, slot: BranchSlot) -> BranchSlot {
        if let Some(cached) = self.fullest_timelines[slot.index()] {
            return cached;
        }
        let parents = self.parents();
        let mut best: Option<(u32, u32, BranchSlot)> = None;
        let occupied: Vec<BranchSlot> = self.occupied().collect();
        for candidate in occupied {
            if candidate == slot || !Self::is_descendant(&parents, candidate, slot) {
                continue;
            }
            let candidate_key = self.key_frame(candidate);
            let distance = self.first_difference(slot, candidate);
            if distance < candidate_key {
                continue;
            }
            let rank = (candidate_key, distance, candidate);
            if best.map_or(true, |best| rank > best) {
                best = Some(rank);
            }
        }
        let fullest = best.map_or(slot, |(_, _, candidate)| candidate);
        self.fullest_timelines[slot.index()] = Some(fullest);
        fullest
    }

    /// The direct children of a node, in ascending slot order.
    pub fn children(&mut self, node: Parent) -> Vec<BranchSlot> {
        let parents = self.parents();
        self.occupied()
            .filter(|slot| parents[slot.index()] == node)
            .collect()
    }

    /// The branch set on `frame`, preferring the current branch.
    pub fn find_branch_at_frame(&self, frame: u32) -> Option<BranchSlot> {
        if let Some(current) = self.current {
            if self.slot(current).map(Branch::key_frame) == Some(frame) {
                return Some(current);
            }
        }
        self.occupied().find(|&slot| self.key_frame(slot) == frame)
    }

    /// Write the graph, or a skip marker if `present` is false.
    pub fn save<W: Write>(&self, writer: &mut W, present: bool) -> Result<(), LogError> {
        write_tag(writer, BRANCHES_TAG, present)?;
        if !present {
            return Ok(());
        }
        for slot in &self.slots {
            Branch::save_optional(slot.as_ref(), writer)?;
        }
        write_str(writer, &self.cloud_timestamp)?;
        write_u8(writer, BranchSlot::to_byte(self.current))?;
        write_u8(writer, u8::from(self.changes_since_current))?;
        write_str(writer, &self.current_timestamp)?;
        match &self.parents {
            Some(parents) => {
                write_u8(writer, 1)?;
                for parent in parents {
                    write_u8(writer, BranchSlot::to_byte(parent.slot()))?;
                }
            }
            None => write_u8(writer, 0)?,
        }
        for &fullest in &self.fullest_timelines {
            write_u8(writer, BranchSlot::to_byte(fullest))?;
        }
        for row in &self.first_differences {
            for &distance in row {
                write_opt_u32(writer, distance)?;
            }
        }
        Ok(())
    }

    /// Read a graph written by [BranchGraph::save].
    ///
    /// A skipped section yields an empty graph.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, LogError> {
        let mut graph = Self::new();
        if read_tag(reader, BRANCHES_TAG)? == Section::Skipped {
            return Ok(graph);
        }
        for slot in &mut graph.slots {
            *slot = Branch::load_optional(reader)?;
        }
        graph.cloud_timestamp = read_str(reader)?;
        graph.current = BranchSlot::from_byte(read_u8(reader)?)?;
        graph.changes_since_current = read_u8(reader)? != 0;
        graph.current_timestamp = read_str(reader)?;
        if read_u8(reader)? != 0 {
            let mut parents = [Parent::Cloud; BranchSlot::COUNT];
            for parent in &mut parents {
                if let Some(slot) = BranchSlot::from_byte(read_u8(reader)?)? {
                    *parent = Parent::Slot(slot);
                }
            }
            graph.parents = Some(parents);
        }
        for fullest in &mut graph.fullest_timelines {
            *fullest = BranchSlot::from_byte(read_u8(reader)?)?;
        }
        for row in &mut graph.first_differences {
            for distance in row.iter_mut() {
                *distance = read_opt_u32(reader)?;
            }
        }
        if let Some(current) = graph.current {
            if graph.slot(current).is_none() {
                return Err(LogError::InvalidData("current branch slot is empty"));
            }
        }
        Ok(graph)
    }
}
