use std::{error, fmt, io, sync::Arc};

use crate::Tag;

/// An error encountered while encoding or decoding a log.
#[derive(Debug, Clone)]
pub enum LogError {
    /// An I/O error other than hitting the end of the stream.
    Io(Arc<io::Error>),
    /// The stream ended before the section was complete.
    Truncated,
    /// A section began with an unexpected tag.
    BadTag {
        /// The tag that was expected (non-skip variant).
        expected: Tag,
        /// The bytes that were actually read.
        found: Tag,
    },
    /// Compressed data could not be inflated.
    Decompress(Arc<io::Error>),
    /// A decoded payload did not have the length recorded in its header.
    SizeMismatch {
        /// The length stored in the header.
        expected: usize,
        /// The length actually produced.
        actual: usize,
    },
    /// The payload decoded but violated an invariant of the log.
    InvalidData(&'static str),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::Io(error) => write!(f, "{}", error),
            LogError::Truncated => write!(f, "unexpected end of data"),
            LogError::BadTag { expected, found } => write!(
                f,
                "expected section {}, found {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(found),
            ),
            LogError::Decompress(error) => write!(f, "failed to decompress: {}", error),
            LogError::SizeMismatch { expected, actual } => write!(
                f,
                "decompressed size {} does not match expected size {}",
                actual, expected
            ),
            LogError::InvalidData(reason) => write!(f, "invalid data: {}", reason),
        }
    }
}

impl error::Error for LogError {}

impl From<io::Error> for LogError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => Self::Truncated,
            _ => Self::Io(Arc::new(error)),
        }
    }
}
