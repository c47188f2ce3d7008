use serde::{Deserialize, Serialize};

/// Which greenzone checkpoints are written when a project is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreenzoneSaveMode {
    /// Save every checkpoint.
    All,
    /// Save frame 0 and every frame divisible by the given interval.
    EveryNth(u32),
    /// Save frame 0 and frames that carry a marker.
    Marked,
    /// Do not save the greenzone.
    Nothing,
}

impl Default for GreenzoneSaveMode {
    fn default() -> Self {
        Self::All
    }
}

/// Settings that affect how edits are recorded and cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// The number of undo steps kept in history.
    pub max_undo_levels: usize,
    /// The eviction window, in frames.
    pub greenzone_capacity: u32,
    /// Track which buttons were toggled recently.
    pub enable_hot_changes: bool,
    /// Merge consecutive drags and recordings into one history entry.
    pub combine_consecutive: bool,
    /// Insert or delete input when a frame's lag status flips during playback.
    pub auto_adjust_input_for_lag: bool,
    /// Shift markers along with inserted and deleted frames.
    pub bind_markers_to_input: bool,
    /// Deploying a branch restores its whole movie instead of only the frames before its
    /// keyframe.
    pub branches_restore_entire_movie: bool,
    /// Which checkpoints are saved with a project.
    pub greenzone_save_mode: GreenzoneSaveMode,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_undo_levels: 100,
            greenzone_capacity: 10000,
            enable_hot_changes: true,
            combine_consecutive: true,
            auto_adjust_input_for_lag: true,
            bind_markers_to_input: true,
            branches_restore_entire_movie: true,
            greenzone_save_mode: GreenzoneSaveMode::All,
        }
    }
}
