//! # sitewatch-alerts
//!
//! Notifications for monitored imaging sites.
//!
//! `sitewatch-alerts` turns a [`HealthSummary`](sitewatch_sites::HealthSummary)
//! into at most one notification per evaluation and delivers it through a
//! pluggable sink.
//!
//! # Features
//!
//! - **No-activity alerts**: sent once per inactivity episode
//! - **Activity reports**: sent when the caller asks for them and there is activity
//! - **Throttling**: at most one notification per site per window
//! - **Sinks**: webhook delivery, dry-run logging and an in-memory recorder
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use sitewatch_alerts::{AlertDispatcher, DispatchRequest, NotificationKind, RecordingSink};
//! use sitewatch_sites::{Cadence, HealthEvaluator, SiteMonitorConfig, SiteStatus};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = Arc::new(RecordingSink::new());
//! let dispatcher = AlertDispatcher::new(sink.clone());
//!
//! let config = SiteMonitorConfig::new("Clinic 7", "clinic-7", Cadence::Hourly)
//!     .with_notifications("https://hooks.example.com/services/T000/B000/XXX");
//! let now = Utc::now();
//! let summary = HealthEvaluator::default().summarize("clinic-7", Vec::new(), now);
//!
//! let outcome = dispatcher
//!     .dispatch(DispatchRequest {
//!         summary: &summary,
//!         config: &config,
//!         previous_status: SiteStatus::Active,
//!         request_report: false,
//!         now,
//!     })
//!     .await;
//!
//! assert_eq!(outcome.sent, Some(NotificationKind::NoActivityAlert));
//! assert_eq!(sink.count(), 1);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod sinks;

// Re-export main types
pub use dispatcher::{
    AlertDispatcher, DEFAULT_THROTTLE_SECS, DispatchOutcome, DispatchRequest, DispatchSkip,
};
pub use error::{AlertError, Result};
pub use payload::{Block, BlockPayload, NotificationKind, TextObject};
pub use sinks::{
    DEFAULT_TIMEOUT_SECS, DeliveryReceipt, LogSink, NotificationSink, RecordedDelivery,
    RecordingSink, WebhookSink,
};
