#![allow(missing_docs)]

use std::{error, fmt, io, sync::Arc};

use tased_log::LogError;
use tased_timeline::BranchSlot;

#[derive(Debug, Clone)]
pub enum Error {
    Log(LogError),
    ProjectReadError {
        filename: String,
        error: Arc<io::Error>,
    },
    ProjectWriteError {
        filename: String,
        error: Arc<io::Error>,
    },
    InvalidProject {
        filename: String,
    },
    UnsupportedVersion {
        filename: String,
        version: u32,
    },
    ConfigReadError {
        filename: String,
        error: Arc<io::Error>,
    },
    ConfigParseError {
        filename: String,
        error: Arc<serde_json::Error>,
    },
    InvalidBranchSlot(u8),
    EmptyBranchSlot(BranchSlot),
    RestoreFailed {
        frame: u32,
    },
    MissingCheckpoint {
        frame: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Log(error) => write!(f, "{}", error),
            Error::ProjectReadError { filename, error } => {
                write!(f, "failed to read {}:\n  {}", filename, error)
            }
            Error::ProjectWriteError { filename, error } => {
                write!(f, "failed to write {}:\n  {}", filename, error)
            }
            Error::InvalidProject { filename } => {
                write!(f, "invalid project file: {}", filename)
            }
            Error::UnsupportedVersion { filename, version } => {
                write!(f, "unsupported project version {} in {}", version, filename)
            }
            Error::ConfigReadError { filename, error } => {
                write!(f, "failed to read config {}:\n  {}", filename, error)
            }
            Error::ConfigParseError { filename, error } => {
                write!(f, "failed to parse config {}:\n  {}", filename, error)
            }
            Error::InvalidBranchSlot(number) => write!(f, "invalid branch slot: {}", number),
            Error::EmptyBranchSlot(slot) => write!(f, "branch slot {} is empty", slot),
            Error::RestoreFailed { frame } => {
                write!(f, "engine rejected the checkpoint for frame {}", frame)
            }
            Error::MissingCheckpoint { frame } => {
                write!(f, "no checkpoint at or before frame {}", frame)
            }
        }
    }
}

impl error::Error for Error {}

impl From<LogError> for Error {
    fn from(v: LogError) -> Self {
        Self::Log(v)
    }
}
