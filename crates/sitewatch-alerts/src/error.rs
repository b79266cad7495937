//! Error types for the sitewatch-alerts crate.

use thiserror::Error;

/// Errors that can occur while delivering notifications.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Notification delivery failed.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// The notification target cannot be used.
    #[error("invalid notification target: {reason}")]
    InvalidTarget {
        /// The reason the target was rejected.
        reason: String,
    },

    /// Delivery did not complete in time.
    #[error("notification timed out after {after_secs}s")]
    Timeout {
        /// The timeout that elapsed.
        after_secs: u64,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
