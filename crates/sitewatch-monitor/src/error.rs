//! Error types for the sitewatch-monitor crate.

use sitewatch_alerts::AlertError;
use sitewatch_logs::LogError;
use sitewatch_sites::SiteError;
use thiserror::Error;

/// Errors that can occur while monitoring sites.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The log source could not be queried.
    #[error("log fetch failed: {reason}")]
    Fetch {
        /// The reason the fetch failed.
        reason: String,
    },

    /// The log source did not answer in time.
    #[error("log fetch timed out after {after_secs}s")]
    FetchTimeout {
        /// The timeout that elapsed.
        after_secs: u64,
    },

    /// Monitor settings are invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the settings were rejected.
        reason: String,
    },

    /// Site configuration error.
    #[error(transparent)]
    Site(#[from] SiteError),

    /// Notification error.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// Log processing error.
    #[error(transparent)]
    Log(#[from] LogError),
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
