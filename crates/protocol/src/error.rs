//! Protocol error types
//!
//! Errors that can occur when building messages from external input.

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Input is not valid JSON
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Field has a type the payload model cannot carry
    #[error("unsupported value for field '{field}': {kind}")]
    UnsupportedValue { field: String, kind: &'static str },
}

impl ProtocolError {
    /// Create a missing field error
    #[inline]
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField(field)
    }

    /// Create an unsupported value error
    #[inline]
    pub fn unsupported(field: impl Into<String>, kind: &'static str) -> Self {
        Self::UnsupportedValue {
            field: field.into(),
            kind,
        }
    }
}
