//! Per-frame logs that describe one version of a TAS editing timeline.
//!
//! There are three kinds of log:
//! - [InputLog] stores the controller bytes for every frame, optionally with a "hot change"
//!   map that tracks which buttons were toggled recently
//! - [LagLog] stores whether the machine polled input on each frame
//! - [MarkerSet] stores sparse annotations on frames
//!
//! Every log can find the first frame at which it disagrees with another log of the same
//! kind. Higher layers use this to decide how much cached state an edit invalidates.
//!
//! # Note on frame ranges
//!
//! Diffing methods accept any `RangeBounds<u32>`. Ranges that extend past the end of either
//! log are clamped rather than rejected. If the two logs have different lengths, the first
//! frame after the shorter log counts as a difference, provided it falls inside the range.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use codec::*;
pub use error::*;
pub use input::*;
pub use lag::*;
pub use markers::*;
pub use source::*;

mod codec;
mod diff;
mod error;
mod input;
mod lag;
mod markers;
mod source;
