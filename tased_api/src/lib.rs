//! A complete editing session for a TAS movie.
//!
//! [EditorSession] ties the live input to its undo [tased_timeline::History], greenzone and
//! branches, and drives an [tased_timeline::ExecutionEngine] through the movie. Sessions can
//! be written to and read from project files, see [EditorSession::save_project] and
//! [read_project].

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use config::*;
pub use error::*;
pub use project::*;
pub use session::*;
pub use tased_log;
pub use tased_timeline;

mod config;
mod error;
mod project;
mod session;
