//! Daemon configuration.
//!
//! Settings are read from a TOML file. Every section is optional and falls
//! back to defaults:
//! - `state_path` for the site config store
//! - `[scheduler]` tick interval, cooldown and report policy
//! - `[fetch]` log source endpoint and limits
//! - `[notify]` throttle, delivery timeout and dry-run switch
//! - `[business_hours]` opening window and staleness threshold

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sitewatch_monitor::{MonitorError, Result, SchedulerConfig};
use sitewatch_sites::{BusinessHours, HealthEvaluator};

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSection {
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Minimum seconds between two triggered runs for one site.
    pub cooldown_secs: u64,
    /// Whether scheduled runs send activity reports.
    pub report_on_scheduled_runs: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: 900,
            cooldown_secs: 7200,
            report_on_scheduled_runs: true,
        }
    }
}

/// Log source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchSection {
    /// URL the fetch request is posted to.
    pub endpoint: String,
    /// API version sent with each request.
    pub version: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum records per request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api/logs/query".to_string(),
            version: "v1".to_string(),
            timeout_secs: 10,
            limit: None,
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifySection {
    /// Minimum seconds between two notifications for one site.
    pub throttle_secs: u64,
    /// Webhook timeout in seconds.
    pub timeout_secs: u64,
    /// Log notifications instead of delivering them.
    pub dry_run: bool,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            throttle_secs: 1800,
            timeout_secs: 10,
            dry_run: false,
        }
    }
}

/// Business-hours settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BusinessHoursSection {
    /// Offset of local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// First hour of business (inclusive).
    pub open_hour: u32,
    /// Closing hour (exclusive).
    pub close_hour: u32,
    /// Hours without treatments before an open site is flagged.
    pub stale_after_hours: u32,
}

impl Default for BusinessHoursSection {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            open_hour: 9,
            close_hour: 17,
            stale_after_hours: 5,
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding `sites.json`.
    pub state_path: PathBuf,
    /// Scheduler settings.
    pub scheduler: SchedulerSection,
    /// Log source settings.
    pub fetch: FetchSection,
    /// Notification settings.
    pub notify: NotifySection,
    /// Business-hours settings.
    pub business_hours: BusinessHoursSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("/var/lib/sitewatch"),
            scheduler: SchedulerSection::default(),
            fetch: FetchSection::default(),
            notify: NotifySection::default(),
            business_hours: BusinessHoursSection::default(),
        }
    }
}

/// Longest accepted cooldown or throttle window (7 days).
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

fn window(field: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .filter(|_| secs <= MAX_WINDOW_SECS)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| invalid(format!("{field} must be at most {MAX_WINDOW_SECS}")))
}

fn invalid(reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidConfig {
        reason: reason.into(),
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            invalid(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| invalid(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| invalid(format!("failed to serialize config: {e}")))
    }

    /// Write the configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| invalid(format!("failed to create '{}': {e}", parent.display())))?;
        }
        std::fs::write(path, self.to_toml()?)
            .map_err(|e| invalid(format!("failed to write '{}': {e}", path.display())))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidConfig` if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.state_path.as_os_str().is_empty() {
            return Err(invalid("state_path cannot be empty"));
        }

        if self.scheduler.tick_interval_secs == 0 {
            return Err(invalid("scheduler.tick_interval_secs must be positive"));
        }

        let endpoint = url::Url::parse(&self.fetch.endpoint)
            .map_err(|e| invalid(format!("fetch.endpoint is not a valid URL: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid("fetch.endpoint must use http or https"));
        }
        if self.fetch.version.trim().is_empty() {
            return Err(invalid("fetch.version cannot be empty"));
        }
        if !(1..=60).contains(&self.fetch.timeout_secs) {
            return Err(invalid("fetch.timeout_secs must be between 1 and 60"));
        }
        if self.fetch.limit == Some(0) {
            return Err(invalid("fetch.limit must be positive when set"));
        }

        if self.scheduler.cooldown_secs > MAX_WINDOW_SECS {
            return Err(invalid(format!(
                "scheduler.cooldown_secs must be at most {MAX_WINDOW_SECS}"
            )));
        }

        if self.notify.throttle_secs > MAX_WINDOW_SECS {
            return Err(invalid(format!(
                "notify.throttle_secs must be at most {MAX_WINDOW_SECS}"
            )));
        }
        if !(1..=60).contains(&self.notify.timeout_secs) {
            return Err(invalid("notify.timeout_secs must be between 1 and 60"));
        }

        if self.business_hours.stale_after_hours == 0 {
            return Err(invalid("business_hours.stale_after_hours must be positive"));
        }
        self.business_hours()?;

        Ok(())
    }

    /// Scheduler settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the cooldown is out of range.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            tick_interval: StdDuration::from_secs(self.scheduler.tick_interval_secs),
            cooldown: window("scheduler.cooldown_secs", self.scheduler.cooldown_secs)?,
            fetch_timeout: StdDuration::from_secs(self.fetch.timeout_secs),
            fetch_version: self.fetch.version.clone(),
            fetch_limit: self.fetch.limit,
            report_on_scheduled_runs: self.scheduler.report_on_scheduled_runs,
        })
    }

    /// Business hours derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the hours are out of range.
    pub fn business_hours(&self) -> Result<BusinessHours> {
        let hours = &self.business_hours;
        Ok(BusinessHours::new(
            hours.utc_offset_minutes,
            hours.open_hour,
            hours.close_hour,
        )?)
    }

    /// Health evaluator derived from this configuration.
    pub fn evaluator(&self) -> Result<HealthEvaluator> {
        Ok(HealthEvaluator::new(
            self.business_hours()?,
            Duration::hours(i64::from(self.business_hours.stale_after_hours)),
        ))
    }

    /// Throttle window for notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is out of range.
    pub fn throttle(&self) -> Result<Duration> {
        window("notify.throttle_secs", self.notify.throttle_secs)
    }

    /// Upper bound on one notification delivery.
    #[must_use]
    pub const fn delivery_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.notify.timeout_secs)
    }
}
