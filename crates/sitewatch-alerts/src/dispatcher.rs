//! Alert dispatcher.
//!
//! Decides whether an evaluation warrants a notification and delivers it
//! through a [`NotificationSink`], throttled per site.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sitewatch_sites::{HealthSummary, SiteMonitorConfig, SiteStatus};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::AlertError;
use crate::payload::{BlockPayload, NotificationKind};
use crate::sinks::{DEFAULT_TIMEOUT_SECS, NotificationSink};

/// Default minimum spacing between two notifications for one site.
pub const DEFAULT_THROTTLE_SECS: i64 = 30 * 60;

/// Why a dispatch sent nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DispatchSkip {
    /// Notifications are disabled for the site.
    NotificationsDisabled,
    /// Notifications are enabled but no target is configured.
    MissingTarget,
    /// Neither an alert nor a report is due.
    NothingToSend,
    /// A notification was sent for this site too recently.
    Throttled {
        /// When the next notification may be sent.
        until: DateTime<Utc>,
    },
}

/// Input to [`AlertDispatcher::dispatch`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    /// The evaluation result.
    pub summary: &'a HealthSummary,
    /// The site config as persisted after the evaluation.
    pub config: &'a SiteMonitorConfig,
    /// Status before this evaluation.
    pub previous_status: SiteStatus,
    /// Whether the caller wants an activity report.
    pub request_report: bool,
    /// Current instant.
    pub now: DateTime<Utc>,
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// The notification that was delivered.
    pub sent: Option<NotificationKind>,
    /// Why nothing was sent.
    pub skipped: Option<DispatchSkip>,
    /// The alert flag the config should carry after this dispatch.
    pub no_activity_alert_sent: bool,
    /// Delivery error, if delivery was attempted and failed.
    pub error: Option<String>,
}

impl DispatchOutcome {
    fn skipped(reason: DispatchSkip, flag: bool) -> Self {
        Self {
            skipped: Some(reason),
            no_activity_alert_sent: flag,
            ..Self::default()
        }
    }
}

/// Sends no-activity alerts and activity reports.
#[derive(Debug)]
pub struct AlertDispatcher {
    sink: Arc<dyn NotificationSink>,
    throttle: Duration,
    delivery_timeout: StdDuration,
    /// Site ID -> time of the last successful delivery.
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AlertDispatcher {
    /// Creates a dispatcher with the default throttle window.
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_throttle(sink, Duration::seconds(DEFAULT_THROTTLE_SECS))
    }

    /// Creates a dispatcher with a custom throttle window.
    #[must_use]
    pub fn with_throttle(sink: Arc<dyn NotificationSink>, throttle: Duration) -> Self {
        Self {
            sink,
            throttle,
            delivery_timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Bounds every delivery, whatever the sink.
    #[must_use]
    pub fn with_delivery_timeout(mut self, delivery_timeout: StdDuration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    /// Returns the throttle window.
    #[must_use]
    pub const fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Returns the delivery timeout.
    #[must_use]
    pub const fn delivery_timeout(&self) -> StdDuration {
        self.delivery_timeout
    }

    /// Returns when a notification was last delivered for a site.
    #[must_use]
    pub fn last_sent(&self, site_id: &str) -> Option<DateTime<Utc>> {
        self.last_sent.lock().get(site_id).copied()
    }

    /// Forgets all delivery times.
    pub fn reset(&self) {
        self.last_sent.lock().clear();
    }

    /// Picks the notification an evaluation warrants, if any.
    #[must_use]
    pub fn decide(request: &DispatchRequest<'_>) -> Option<NotificationKind> {
        let summary = request.summary;
        if summary.status == SiteStatus::Inactive {
            let new_episode = request.previous_status != SiteStatus::Inactive;
            (new_episode || !request.config.no_activity_alert_sent)
                .then_some(NotificationKind::NoActivityAlert)
        } else {
            (request.request_report && summary.total_events > 0)
                .then_some(NotificationKind::ActivityReport)
        }
    }

    /// Decides and delivers a notification for one evaluation.
    ///
    /// Delivery failures are logged and reported in the outcome, never
    /// returned as errors.
    pub async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchOutcome {
        let config = request.config;
        let flag = config.no_activity_alert_sent;

        if !config.notifications_enabled {
            return DispatchOutcome::skipped(DispatchSkip::NotificationsDisabled, flag);
        }
        let Some(target) = config
            .notification_target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
        else {
            warn!(site_id = %config.site_id, "notifications enabled without a target");
            return DispatchOutcome::skipped(DispatchSkip::MissingTarget, flag);
        };
        let Some(kind) = Self::decide(&request) else {
            return DispatchOutcome::skipped(DispatchSkip::NothingToSend, flag);
        };

        let previous = match self.reserve(&config.site_id, request.now) {
            Ok(previous) => previous,
            Err(until) => {
                debug!(site_id = %config.site_id, kind = %kind, until = %until, "notification throttled");
                return DispatchOutcome::skipped(DispatchSkip::Throttled { until }, flag);
            }
        };

        let payload = BlockPayload::build(kind, config, request.summary);
        let delivered = timeout(self.delivery_timeout, self.sink.deliver(target, &payload))
            .await
            .unwrap_or_else(|_| {
                Err(AlertError::Timeout {
                    after_secs: self.delivery_timeout.as_secs(),
                })
            });
        match delivered {
            Ok(receipt) => {
                info!(
                    site_id = %config.site_id,
                    kind = %kind,
                    sink = %receipt.sink,
                    status = %request.summary.status,
                    "notification sent"
                );
                DispatchOutcome {
                    sent: Some(kind),
                    skipped: None,
                    no_activity_alert_sent: kind == NotificationKind::NoActivityAlert,
                    error: None,
                }
            }
            Err(e) => {
                self.release(&config.site_id, request.now, previous);
                warn!(site_id = %config.site_id, kind = %kind, error = %e, "notification failed");
                DispatchOutcome {
                    sent: None,
                    skipped: None,
                    no_activity_alert_sent: flag,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Claims the throttle slot for a site. Returns the previous send time,
    /// or the end of the current window if the slot is taken.
    fn reserve(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<DateTime<Utc>>, DateTime<Utc>> {
        let mut last_sent = self.last_sent.lock();
        if let Some(last) = last_sent.get(site_id).copied() {
            if now - last < self.throttle {
                return Err(last
                    .checked_add_signed(self.throttle)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC));
            }
        }
        Ok(last_sent.insert(site_id.to_string(), now))
    }

    /// Gives back a reservation after a failed delivery.
    fn release(&self, site_id: &str, reserved_at: DateTime<Utc>, previous: Option<DateTime<Utc>>) {
        let mut last_sent = self.last_sent.lock();
        if last_sent.get(site_id) != Some(&reserved_at) {
            return;
        }
        match previous {
            Some(at) => {
                last_sent.insert(site_id.to_string(), at);
            }
            None => {
                last_sent.remove(site_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::RecordingSink;
    use chrono::TimeZone;
    use sitewatch_sites::Cadence;

    fn at(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 27, h, min, 0).unwrap()
    }

    fn config() -> SiteMonitorConfig {
        SiteMonitorConfig::new("Clinic 7", "clinic-7", Cadence::Hourly)
            .with_notifications("https://hooks.example.com/services/T000/B000/XXX")
    }

    fn summary(total: usize, status: SiteStatus, now: DateTime<Utc>) -> HealthSummary {
        HealthSummary {
            id: "s".to_string(),
            site_id: "clinic-7".to_string(),
            evaluated_at: now,
            total_events: total,
            last_activity_at: (total > 0).then_some(now),
            status,
            treatments: Vec::new(),
        }
    }

    fn dispatcher() -> (Arc<RecordingSink>, AlertDispatcher) {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = AlertDispatcher::new(sink.clone());
        (sink, dispatcher)
    }

    mod decide_tests {
        use super::*;

        fn request<'a>(
            summary: &'a HealthSummary,
            config: &'a SiteMonitorConfig,
            previous_status: SiteStatus,
            request_report: bool,
        ) -> DispatchRequest<'a> {
            DispatchRequest {
                summary,
                config,
                previous_status,
                request_report,
                now: summary.evaluated_at,
            }
        }

        #[test]
        fn inactive_first_time_alerts() {
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));
            let config = config();
            assert_eq!(
                AlertDispatcher::decide(&request(&summary, &config, SiteStatus::Inactive, false)),
                Some(NotificationKind::NoActivityAlert)
            );
        }

        #[test]
        fn inactive_again_is_silent() {
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));
            let mut config = config();
            config.no_activity_alert_sent = true;
            assert_eq!(
                AlertDispatcher::decide(&request(&summary, &config, SiteStatus::Inactive, true)),
                None
            );
        }

        #[test]
        fn transition_into_inactive_alerts_even_with_flag() {
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));
            let mut config = config();
            config.no_activity_alert_sent = true;
            assert_eq!(
                AlertDispatcher::decide(&request(&summary, &config, SiteStatus::Active, false)),
                Some(NotificationKind::NoActivityAlert)
            );
        }

        #[test]
        fn report_only_when_requested() {
            let summary = summary(3, SiteStatus::Active, at(10, 0));
            let config = config();
            assert_eq!(
                AlertDispatcher::decide(&request(&summary, &config, SiteStatus::Active, true)),
                Some(NotificationKind::ActivityReport)
            );
            assert_eq!(
                AlertDispatcher::decide(&request(&summary, &config, SiteStatus::Active, false)),
                None
            );
        }
    }

    mod dispatch_tests {
        use super::*;

        #[tokio::test]
        async fn disabled_notifications_skip() {
            let (sink, dispatcher) = dispatcher();
            let config = SiteMonitorConfig::new("Clinic 7", "clinic-7", Cadence::Hourly);
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 0),
                })
                .await;

            assert_eq!(outcome.skipped, Some(DispatchSkip::NotificationsDisabled));
            assert_eq!(sink.count(), 0);
        }

        #[tokio::test]
        async fn missing_target_skips() {
            let (sink, dispatcher) = dispatcher();
            let mut config = config();
            config.notification_target = None;
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 0),
                })
                .await;

            assert_eq!(outcome.skipped, Some(DispatchSkip::MissingTarget));
            assert_eq!(sink.count(), 0);
        }

        #[tokio::test]
        async fn throttle_blocks_second_notification() {
            let (sink, dispatcher) = dispatcher();
            let config = config();
            let first = summary(0, SiteStatus::Inactive, at(10, 0));
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &first,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 0),
                })
                .await;
            assert_eq!(outcome.sent, Some(NotificationKind::NoActivityAlert));
            assert!(outcome.no_activity_alert_sent);

            let second = summary(5, SiteStatus::Active, at(10, 20));
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &second,
                    config: &config,
                    previous_status: SiteStatus::Inactive,
                    request_report: true,
                    now: at(10, 20),
                })
                .await;
            assert_eq!(
                outcome.skipped,
                Some(DispatchSkip::Throttled { until: at(10, 30) })
            );
            assert_eq!(sink.count(), 1);
        }

        #[tokio::test]
        async fn failed_delivery_does_not_consume_window() {
            let (sink, dispatcher) = dispatcher();
            let config = config();
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));

            sink.set_failing(true);
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 0),
                })
                .await;
            assert!(outcome.sent.is_none());
            assert!(outcome.error.is_some());
            assert!(!outcome.no_activity_alert_sent);
            assert!(dispatcher.last_sent("clinic-7").is_none());

            sink.set_failing(false);
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 5),
                })
                .await;
            assert_eq!(outcome.sent, Some(NotificationKind::NoActivityAlert));
            assert_eq!(dispatcher.last_sent("clinic-7"), Some(at(10, 5)));
        }

        #[tokio::test]
        async fn hung_sink_times_out_and_releases_window() {
            let sink = Arc::new(RecordingSink::new());
            let dispatcher = AlertDispatcher::new(sink.clone())
                .with_delivery_timeout(StdDuration::from_millis(50));
            let config = config();
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));

            sink.set_delay(Some(StdDuration::from_secs(3600)));
            let outcome = tokio::time::timeout(
                StdDuration::from_secs(5),
                dispatcher.dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 0),
                }),
            )
            .await
            .unwrap();

            assert!(outcome.sent.is_none());
            assert!(outcome.error.as_deref().unwrap().contains("timed out"));
            assert!(!outcome.no_activity_alert_sent);
            assert!(dispatcher.last_sent("clinic-7").is_none());
            assert_eq!(sink.count(), 0);
        }

        #[test]
        fn default_delivery_timeout() {
            let (_sink, dispatcher) = dispatcher();
            assert_eq!(
                dispatcher.delivery_timeout(),
                StdDuration::from_secs(DEFAULT_TIMEOUT_SECS)
            );
        }

        #[tokio::test]
        async fn report_clears_flag() {
            let (_sink, dispatcher) = dispatcher();
            let mut config = config();
            config.no_activity_alert_sent = true;
            let summary = summary(2, SiteStatus::Active, at(10, 0));
            let outcome = dispatcher
                .dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Inactive,
                    request_report: true,
                    now: at(10, 0),
                })
                .await;
            assert_eq!(outcome.sent, Some(NotificationKind::ActivityReport));
            assert!(!outcome.no_activity_alert_sent);
        }

        #[tokio::test]
        async fn reset_forgets_windows() {
            let (_sink, dispatcher) = dispatcher();
            let config = config();
            let summary = summary(0, SiteStatus::Inactive, at(10, 0));
            dispatcher
                .dispatch(DispatchRequest {
                    summary: &summary,
                    config: &config,
                    previous_status: SiteStatus::Active,
                    request_report: false,
                    now: at(10, 0),
                })
                .await;
            assert!(dispatcher.last_sent("clinic-7").is_some());
            dispatcher.reset();
            assert!(dispatcher.last_sent("clinic-7").is_none());
        }
    }
}
