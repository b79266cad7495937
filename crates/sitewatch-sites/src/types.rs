//! Core types for monitored sites.
//!
//! - [`SiteStatus`]: operational status of a site
//! - [`Cadence`]: how often a site is re-evaluated
//! - [`SiteMonitorConfig`]: a monitored site and its scheduler bookkeeping
//! - [`SiteConfigPatch`]: a partial update to a config
//! - [`HealthSummary`]: the result of one evaluation

use std::fmt;

use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sitewatch_logs::TreatmentEvent;
use uuid::Uuid;

use crate::error::{Result, SiteError};

/// Operational status of a site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// No treatments recorded.
    #[default]
    Inactive,
    /// Treatments recorded recently.
    Active,
    /// Treatments recorded, but none for too long during business hours.
    Warning,
}

impl SiteStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a site is scheduled for evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Top of every hour.
    #[default]
    Hourly,
    /// Every UTC midnight.
    Daily,
    /// Every Sunday at UTC midnight.
    Weekly,
}

impl Cadence {
    /// Returns the next scheduled instant strictly after `now`.
    #[must_use]
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hourly => {
                let hour_start = now
                    .duration_trunc(Duration::hours(1))
                    .unwrap_or(now);
                hour_start + Duration::hours(1)
            }
            Self::Daily => midnight_after(now, 1),
            Self::Weekly => {
                let from_sunday = i64::from(now.weekday().num_days_from_sunday());
                midnight_after(now, 7 - from_sunday)
            }
        }
    }

    /// How far back to fetch logs for one evaluation.
    #[must_use]
    pub fn lookback(&self) -> Duration {
        match self {
            Self::Hourly | Self::Daily => Duration::hours(24),
            Self::Weekly => Duration::days(7),
        }
    }

    /// Returns the cadence as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Cadence {
    type Err = SiteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(SiteError::InvalidConfig {
                reason: format!("unknown cadence '{other}'"),
            }),
        }
    }
}

/// UTC midnight `days` days after `now`'s date.
fn midnight_after(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    (now.date_naive() + Duration::days(days))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// A monitored site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMonitorConfig {
    /// Unique identifier for this config.
    pub id: String,
    /// Human-readable site name.
    pub name: String,
    /// Identifier of the site in the log source.
    pub site_id: String,
    /// Evaluation cadence.
    pub cadence: Cadence,
    /// When the last evaluation ran.
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the next evaluation is due (None = due now).
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    /// Whether notifications are sent for this site.
    #[serde(default)]
    pub notifications_enabled: bool,
    /// Webhook URL for notifications.
    #[serde(default)]
    pub notification_target: Option<String>,
    /// Whether the site is being monitored (false = paused).
    #[serde(default = "default_active")]
    pub active: bool,
    /// Most recent treatment seen for the site.
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Whether an alert was already sent for the current inactivity episode.
    #[serde(default)]
    pub no_activity_alert_sent: bool,
    /// Status from the last evaluation.
    #[serde(default)]
    pub status: SiteStatus,
}

const fn default_active() -> bool {
    true
}

impl SiteMonitorConfig {
    /// Maximum allowed length for site names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates an active config with notifications disabled, due immediately.
    #[must_use]
    pub fn new(name: impl Into<String>, site_id: impl Into<String>, cadence: Cadence) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            site_id: site_id.into(),
            cadence,
            last_run_at: None,
            next_run_at: None,
            notifications_enabled: false,
            notification_target: None,
            active: true,
            last_activity_at: None,
            no_activity_alert_sent: false,
            status: SiteStatus::Inactive,
        }
    }

    /// Enables notifications to the given webhook.
    #[must_use]
    pub fn with_notifications(mut self, target: impl Into<String>) -> Self {
        self.notifications_enabled = true;
        self.notification_target = Some(target.into());
        self
    }

    /// Validates the config as it would be saved.
    ///
    /// # Errors
    ///
    /// Returns `SiteError::InvalidConfig` if:
    /// - the name or site ID is empty, or the name is too long
    /// - notifications are enabled without a target
    /// - the target is not an http(s) URL
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if self.name.len() > Self::MAX_NAME_LENGTH {
            return Err(invalid(format!(
                "name exceeds maximum length of {} characters",
                Self::MAX_NAME_LENGTH
            )));
        }
        if self.site_id.trim().is_empty() {
            return Err(invalid("siteId cannot be empty"));
        }

        match (self.notifications_enabled, self.notification_target.as_deref()) {
            (true, None) => {
                return Err(invalid(
                    "notificationTarget is required when notifications are enabled",
                ));
            }
            (true, Some(target)) if target.trim().is_empty() => {
                return Err(invalid(
                    "notificationTarget is required when notifications are enabled",
                ));
            }
            _ => {}
        }

        if let Some(target) = self.notification_target.as_deref().filter(|t| !t.is_empty()) {
            let parsed = url::Url::parse(target)
                .map_err(|e| invalid(format!("notificationTarget is not a valid URL: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid("notificationTarget must use http or https"));
            }
        }

        Ok(())
    }

    /// Returns true if an evaluation is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_none_or(|next| next <= now)
    }
}

fn invalid(reason: impl Into<String>) -> SiteError {
    SiteError::InvalidConfig {
        reason: reason.into(),
    }
}

/// A partial update to a [`SiteMonitorConfig`].
///
/// `None` leaves a field unchanged. For optional fields, `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfigPatch {
    /// New name.
    pub name: Option<String>,
    /// New cadence.
    pub cadence: Option<Cadence>,
    /// New last-run time.
    pub last_run_at: Option<DateTime<Utc>>,
    /// New next-run time.
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    /// Enable or disable notifications.
    pub notifications_enabled: Option<bool>,
    /// Set or clear the notification target.
    pub notification_target: Option<Option<String>>,
    /// Pause or resume the site.
    pub active: Option<bool>,
    /// New last-activity time.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// New alert flag.
    pub no_activity_alert_sent: Option<bool>,
    /// New status.
    pub status: Option<SiteStatus>,
}

impl SiteConfigPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active flag.
    #[must_use]
    pub const fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Sets the status.
    #[must_use]
    pub const fn status(mut self, status: SiteStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the alert flag.
    #[must_use]
    pub const fn no_activity_alert_sent(mut self, sent: bool) -> Self {
        self.no_activity_alert_sent = Some(sent);
        self
    }

    /// Records an evaluation run.
    #[must_use]
    pub const fn ran(mut self, at: DateTime<Utc>, next: DateTime<Utc>) -> Self {
        self.last_run_at = Some(at);
        self.next_run_at = Some(Some(next));
        self
    }

    /// Sets the last-activity time.
    #[must_use]
    pub const fn last_activity_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(at);
        self
    }

    /// Sets or clears notifications.
    #[must_use]
    pub fn notifications(mut self, enabled: bool, target: Option<String>) -> Self {
        self.notifications_enabled = Some(enabled);
        self.notification_target = Some(target);
        self
    }

    /// Sets the cadence and clears the next-run time so the new cadence takes effect.
    #[must_use]
    pub const fn cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = Some(cadence);
        self.next_run_at = Some(None);
        self
    }

    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to a config.
    pub fn apply(&self, config: &mut SiteMonitorConfig) {
        if let Some(name) = &self.name {
            config.name.clone_from(name);
        }
        if let Some(cadence) = self.cadence {
            config.cadence = cadence;
        }
        if let Some(at) = self.last_run_at {
            config.last_run_at = Some(at);
        }
        if let Some(next) = self.next_run_at {
            config.next_run_at = next;
        }
        if let Some(enabled) = self.notifications_enabled {
            config.notifications_enabled = enabled;
        }
        if let Some(target) = &self.notification_target {
            config.notification_target.clone_from(target);
        }
        if let Some(active) = self.active {
            config.active = active;
        }
        if let Some(at) = self.last_activity_at {
            config.last_activity_at = Some(at);
        }
        if let Some(sent) = self.no_activity_alert_sent {
            config.no_activity_alert_sent = sent;
        }
        if let Some(status) = self.status {
            config.status = status;
        }
    }
}

/// The outcome of evaluating one site. Recomputed every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    /// Unique identifier for this summary.
    pub id: String,
    /// Site the summary is for.
    pub site_id: String,
    /// When the evaluation ran.
    pub evaluated_at: DateTime<Utc>,
    /// Number of treatments in the evaluated window.
    pub total_events: usize,
    /// Most recent treatment in the window.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Computed status.
    pub status: SiteStatus,
    /// Treatments, newest first.
    pub treatments: Vec<TreatmentEvent>,
}

impl HealthSummary {
    /// Number of treatments that did not complete.
    #[must_use]
    pub fn failed_events(&self) -> usize {
        self.treatments.iter().filter(|t| !t.succeeded).count()
    }
}
