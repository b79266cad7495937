//! Error types for log normalization and extraction.

use thiserror::Error;

/// Errors that can occur while normalizing or extracting log data.
#[derive(Debug, Error)]
pub enum LogError {
    /// The raw record does not match any known record shape.
    #[error("unrecognized record shape: {0}")]
    UnrecognizedShape(String),

    /// A required field was not present in the raw record.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// An extraction pattern could not be compiled.
    #[error("invalid extraction pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
