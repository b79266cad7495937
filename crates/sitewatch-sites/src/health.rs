//! Site health evaluation.
//!
//! A site is `inactive` when the window holds no treatments, `warning` when
//! the most recent one is too old during business hours, and `active`
//! otherwise.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, Timelike, Utc, Weekday};
use sitewatch_logs::TreatmentEvent;
use uuid::Uuid;

use crate::error::{Result, SiteError};
use crate::types::{HealthSummary, SiteStatus};

/// Default staleness threshold.
pub const DEFAULT_STALE_AFTER_HOURS: i64 = 5;

/// Monday through Friday, `[open_hour, close_hour)` in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    offset: FixedOffset,
    open_hour: u32,
    close_hour: u32,
}

impl BusinessHours {
    /// Creates business hours for the given UTC offset in minutes.
    ///
    /// # Errors
    ///
    /// Returns `SiteError::InvalidBusinessHours` if the offset is outside
    /// ±24h, either hour is above 24, or `open_hour >= close_hour`.
    pub fn new(utc_offset_minutes: i32, open_hour: u32, close_hour: u32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).ok_or_else(
            || SiteError::InvalidBusinessHours {
                reason: format!("UTC offset {utc_offset_minutes} minutes is out of range"),
            },
        )?;
        if close_hour > 24 || open_hour >= close_hour {
            return Err(SiteError::InvalidBusinessHours {
                reason: format!("opening window {open_hour}..{close_hour} is empty or invalid"),
            });
        }
        Ok(Self {
            offset,
            open_hour,
            close_hour,
        })
    }

    /// Returns true if `now` falls on a weekday inside opening hours.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        let weekday = !matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        weekday && (self.open_hour..self.close_hour).contains(&local.hour())
    }

    /// The UTC offset these hours are expressed in.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            open_hour: 9,
            close_hour: 17,
        }
    }
}

/// Computes site status from recent treatments.
#[derive(Debug, Clone)]
pub struct HealthEvaluator {
    hours: BusinessHours,
    stale_after: Duration,
}

impl HealthEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub const fn new(hours: BusinessHours, stale_after: Duration) -> Self {
        Self { hours, stale_after }
    }

    /// The business hours in effect.
    #[must_use]
    pub const fn business_hours(&self) -> &BusinessHours {
        &self.hours
    }

    /// The staleness threshold.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Computes a status from the event count and the latest event time.
    ///
    /// The gap is wall-clock time, so a Friday-evening treatment seen on
    /// Monday morning counts the weekend.
    #[must_use]
    pub fn evaluate(
        &self,
        total_events: usize,
        last_activity_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SiteStatus {
        if total_events == 0 {
            return SiteStatus::Inactive;
        }

        let stale = match last_activity_at {
            None => true,
            Some(last) => self.hours.contains(now) && now - last > self.stale_after,
        };

        if stale {
            SiteStatus::Warning
        } else {
            SiteStatus::Active
        }
    }

    /// Builds a [`HealthSummary`] from extracted events.
    #[must_use]
    pub fn summarize(
        &self,
        site_id: &str,
        treatments: Vec<TreatmentEvent>,
        now: DateTime<Utc>,
    ) -> HealthSummary {
        let last_activity_at = treatments.iter().map(|t| t.timestamp).max();
        let status = self.evaluate(treatments.len(), last_activity_at, now);

        HealthSummary {
            id: Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            evaluated_at: now,
            total_events: treatments.len(),
            last_activity_at,
            status,
            treatments,
        }
    }
}

impl Default for HealthEvaluator {
    fn default() -> Self {
        Self::new(
            BusinessHours::default(),
            Duration::hours(DEFAULT_STALE_AFTER_HOURS),
        )
    }
}
