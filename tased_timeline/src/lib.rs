//! Undo history, checkpoint caching and branches for a TAS editing timeline.
//!
//! The live timeline is an [tased_log::InputSource] plus a [tased_log::LagLog] and a
//! [tased_log::MarkerSet]. After every edit, [History] compares the live logs against its
//! latest [Snapshot] and reports the first frame that changed. That frame is then used to
//! invalidate the [Greenzone], the cache of machine states produced by an
//! [ExecutionEngine], and to mark the [BranchGraph] as having unsaved changes.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use branch::*;
pub use config::*;
pub use engine::*;
pub use greenzone::*;
pub use history::*;
pub use kind::*;
pub use snapshot::*;

mod branch;
mod config;
mod engine;
mod greenzone;
mod history;
mod kind;
mod snapshot;
