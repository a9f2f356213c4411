//! Journal error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for journal operations
pub type Result<T> = std::result::Result<T, JournalError>;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt record in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("another legacy replay is running")]
    ReplayInProgress,

    #[error("replay sink closed")]
    SinkClosed,

    #[error("journal shutting down")]
    Cancelled,
}

impl JournalError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
