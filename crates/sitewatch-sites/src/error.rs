//! Error types for the sitewatch-sites crate.

use thiserror::Error;

/// Errors that can occur while managing monitored sites.
#[derive(Debug, Error)]
pub enum SiteError {
    /// A site configuration failed validation.
    #[error("invalid site config: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// No configuration with the given ID exists.
    #[error("site config not found: {id}")]
    NotFound {
        /// The config ID that was not found.
        id: String,
    },

    /// Another active configuration already monitors this site.
    #[error("site '{site_id}' is already monitored by config {existing_id}")]
    DuplicateSite {
        /// The contested site identifier.
        site_id: String,
        /// The config that already claims it.
        existing_id: String,
    },

    /// A configuration with the same ID already exists.
    #[error("site config already exists: {id}")]
    AlreadyExists {
        /// The duplicate config ID.
        id: String,
    },

    /// Business-hours settings are out of range.
    #[error("invalid business hours: {reason}")]
    InvalidBusinessHours {
        /// Why the settings were rejected.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred while persisting configs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for site operations.
pub type Result<T> = std::result::Result<T, SiteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_config() {
        let err = SiteError::InvalidConfig {
            reason: "name cannot be empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid site config: name cannot be empty");
    }

    #[test]
    fn error_display_not_found() {
        let err = SiteError::NotFound {
            id: "cfg-1".to_string(),
        };
        assert_eq!(err.to_string(), "site config not found: cfg-1");
    }

    #[test]
    fn error_display_duplicate_site() {
        let err = SiteError::DuplicateSite {
            site_id: "clinic-7".to_string(),
            existing_id: "cfg-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "site 'clinic-7' is already monitored by config cfg-1"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SiteError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }
}
