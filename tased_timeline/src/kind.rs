use std::fmt;

use crate::BranchSlot;

/// The operation that produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ModificationKind {
    Init,
    Undefined,
    Set,
    Unset,
    Pattern,
    Insert,
    InsertNum,
    Delete,
    Truncate,
    Clear,
    Cut,
    Paste,
    PasteInsert,
    Clone,
    Record,
    Import,
    /// A branch was saved into a slot.
    Bookmark(BranchSlot),
    /// A branch was deployed and changed the input.
    Branch(BranchSlot),
    /// A branch was deployed and only changed markers.
    MarkerBranch(BranchSlot),
    MarkerSet,
    MarkerRemove,
    MarkerPattern,
    MarkerRename,
    MarkerDrag,
    MarkerSwap,
    MarkerShift,
    ScriptMarkerSet,
    ScriptMarkerRemove,
    ScriptMarkerRename,
    ScriptChange,
}

/// Broad classes of operations, used to decide what an undo step touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    /// Does not change input or markers.
    Other,
    /// Changes input only.
    InputChange,
    /// Changes markers only.
    MarkersChange,
    /// Changes input and may shift markers.
    InputMarkersChange,
}

const SIMPLE_KINDS: [ModificationKind; 16] = [
    ModificationKind::Init,
    ModificationKind::Undefined,
    ModificationKind::Set,
    ModificationKind::Unset,
    ModificationKind::Pattern,
    ModificationKind::Insert,
    ModificationKind::InsertNum,
    ModificationKind::Delete,
    ModificationKind::Truncate,
    ModificationKind::Clear,
    ModificationKind::Cut,
    ModificationKind::Paste,
    ModificationKind::PasteInsert,
    ModificationKind::Clone,
    ModificationKind::Record,
    ModificationKind::Import,
];

const MARKER_KINDS: [ModificationKind; 11] = [
    ModificationKind::MarkerSet,
    ModificationKind::MarkerRemove,
    ModificationKind::MarkerPattern,
    ModificationKind::MarkerRename,
    ModificationKind::MarkerDrag,
    ModificationKind::MarkerSwap,
    ModificationKind::MarkerShift,
    ModificationKind::ScriptMarkerSet,
    ModificationKind::ScriptMarkerRemove,
    ModificationKind::ScriptMarkerRename,
    ModificationKind::ScriptChange,
];

const BOOKMARK_BASE: u8 = SIMPLE_KINDS.len() as u8;
const BRANCH_BASE: u8 = BOOKMARK_BASE + BranchSlot::COUNT as u8;
const MARKER_BRANCH_BASE: u8 = BRANCH_BASE + BranchSlot::COUNT as u8;
const MARKER_BASE: u8 = MARKER_BRANCH_BASE + BranchSlot::COUNT as u8;

impl ModificationKind {
    /// The stable numeric code used in saved projects.
    pub fn code(self) -> u8 {
        match self {
            Self::Bookmark(slot) => BOOKMARK_BASE + slot.number(),
            Self::Branch(slot) => BRANCH_BASE + slot.number(),
            Self::MarkerBranch(slot) => MARKER_BRANCH_BASE + slot.number(),
            kind => {
                let simple = SIMPLE_KINDS.iter().position(|&k| k == kind);
                let marker = MARKER_KINDS.iter().position(|&k| k == kind);
                match (simple, marker) {
                    (Some(index), _) => index as u8,
                    (_, Some(index)) => MARKER_BASE + index as u8,
                    _ => unreachable!("every kind is listed"),
                }
            }
        }
    }

    /// Decode a value produced by [ModificationKind::code].
    pub fn from_code(code: u8) -> Option<Self> {
        if code < BOOKMARK_BASE {
            Some(SIMPLE_KINDS[code as usize])
        } else if code < BRANCH_BASE {
            BranchSlot::new(code - BOOKMARK_BASE).map(Self::Bookmark)
        } else if code < MARKER_BRANCH_BASE {
            BranchSlot::new(code - BRANCH_BASE).map(Self::Branch)
        } else if code < MARKER_BASE {
            BranchSlot::new(code - MARKER_BRANCH_BASE).map(Self::MarkerBranch)
        } else {
            MARKER_KINDS.get((code - MARKER_BASE) as usize).copied()
        }
    }

    /// The category of the operation.
    pub fn category(self) -> OperationCategory {
        use ModificationKind::*;
        match self {
            Init | Undefined | Bookmark(_) => OperationCategory::Other,
            Set | Unset | Pattern | Clear | Cut | Paste | Record | Import => {
                OperationCategory::InputChange
            }
            Insert | InsertNum | Delete | Truncate | PasteInsert | Clone | Branch(_)
            | ScriptChange => OperationCategory::InputMarkersChange,
            MarkerBranch(_) | MarkerSet | MarkerRemove | MarkerPattern | MarkerRename
            | MarkerDrag | MarkerSwap | MarkerShift | ScriptMarkerSet | ScriptMarkerRemove
            | ScriptMarkerRename => OperationCategory::MarkersChange,
        }
    }

    /// The slot involved, for bookmark and branch operations.
    pub fn branch_slot(self) -> Option<BranchSlot> {
        match self {
            Self::Bookmark(slot) | Self::Branch(slot) | Self::MarkerBranch(slot) => Some(slot),
            _ => None,
        }
    }

    /// Returns true if this entry overwrote a branch slot.
    pub fn is_bookmark(self) -> bool {
        matches!(self, Self::Bookmark(_))
    }
}

impl fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Initialization"),
            Self::Undefined => write!(f, "Undefined"),
            Self::Set => write!(f, "Set"),
            Self::Unset => write!(f, "Unset"),
            Self::Pattern => write!(f, "Pattern"),
            Self::Insert => write!(f, "Insert"),
            Self::InsertNum => write!(f, "Insert#"),
            Self::Delete => write!(f, "Delete"),
            Self::Truncate => write!(f, "Truncate"),
            Self::Clear => write!(f, "Clear"),
            Self::Cut => write!(f, "Cut"),
            Self::Paste => write!(f, "Paste"),
            Self::PasteInsert => write!(f, "PasteInsert"),
            Self::Clone => write!(f, "Clone"),
            Self::Record => write!(f, "Record"),
            Self::Import => write!(f, "Import"),
            Self::Bookmark(slot) => write!(f, "Bookmark{}", slot),
            Self::Branch(slot) => write!(f, "Branch{} to ", slot),
            Self::MarkerBranch(slot) => write!(f, "Marker Branch{} to ", slot),
            Self::MarkerSet => write!(f, "Marker Set"),
            Self::MarkerRemove => write!(f, "Marker Remove"),
            Self::MarkerPattern => write!(f, "Marker Pattern"),
            Self::MarkerRename => write!(f, "Marker Rename"),
            Self::MarkerDrag => write!(f, "Marker Drag"),
            Self::MarkerSwap => write!(f, "Marker Swap"),
            Self::MarkerShift => write!(f, "Marker Shift"),
            Self::ScriptMarkerSet => write!(f, "Script Marker Set"),
            Self::ScriptMarkerRemove => write!(f, "Script Marker Remove"),
            Self::ScriptMarkerRename => write!(f, "Script Marker Rename"),
            Self::ScriptChange => write!(f, "Script Change"),
        }
    }
}
