//! Transform error types
//!
//! Only construction can fail. Once running, filters and stages turn every
//! anomaly into forward, discard-with-commit or discard-without-commit.

use thiserror::Error;

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

#[derive(Debug, Error)]
pub enum TransformError {
    /// A head pattern did not compile
    #[error("invalid pattern for tag '{tag}': {source}")]
    InvalidPattern {
        tag: String,
        #[source]
        source: regex::Error,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stage was asked to spawn for a tag it does not handle
    #[error("stage '{stage}' does not support tag '{tag}'")]
    UnsupportedTag { stage: String, tag: String },
}

impl TransformError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unsupported(stage: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::UnsupportedTag {
            stage: stage.into(),
            tag: tag.into(),
        }
    }
}

/// Result type for transform construction
pub type Result<T> = std::result::Result<T, TransformError>;
