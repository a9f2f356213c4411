//! Pipeline error types

use thiserror::Error;

use sluice_transform::TransformError;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A tag stage failed to spawn
    #[error("stage spawn failed: {0}")]
    Stage(#[from] TransformError),

    /// No pipeline is running for the tag
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    /// Every receiver of the channel is gone
    #[error("channel closed: {0}")]
    Closed(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::UnknownTag("app".into());
        assert_eq!(err.to_string(), "unknown tag: app");

        let err = PipelineError::Closed("acceptor.sync".into());
        assert!(err.to_string().contains("acceptor.sync"));

        let err: PipelineError = TransformError::config("bad").into();
        assert!(err.to_string().starts_with("stage spawn failed"));
    }
}
