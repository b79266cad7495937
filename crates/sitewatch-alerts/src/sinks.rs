//! Notification sinks.
//!
//! This module provides the [`NotificationSink`] trait and implementations
//! for delivering payloads to a target.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{AlertError, Result};
use crate::payload::BlockPayload;

/// Default delivery timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Result of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// The sink that delivered the payload.
    pub sink: String,
    /// Response status code (if applicable).
    pub status_code: Option<u16>,
}

impl DeliveryReceipt {
    /// Creates a receipt without a status code.
    #[must_use]
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            status_code: None,
        }
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }
}

/// Trait for notification sinks.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    /// Returns the name of this sink.
    fn name(&self) -> &str;

    /// Delivers a payload to `target`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` or `AlertError::Timeout` if
    /// the payload was not accepted.
    async fn deliver(&self, target: &str, payload: &BlockPayload) -> Result<DeliveryReceipt>;
}

/// Posts payloads as JSON to the target URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookSink {
    /// Creates a webhook sink with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::NotificationFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, target: &str, payload: &BlockPayload) -> Result<DeliveryReceipt> {
        if target.trim().is_empty() {
            return Err(AlertError::InvalidTarget {
                reason: "webhook URL cannot be empty".to_string(),
            });
        }

        let response = self
            .client
            .post(target)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AlertError::Timeout {
                        after_secs: self.timeout.as_secs(),
                    }
                } else {
                    AlertError::NotificationFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::NotificationFailed {
                reason: format!("webhook returned {status}"),
            });
        }

        debug!(status = status.as_u16(), "webhook accepted notification");
        Ok(DeliveryReceipt::new(self.name()).with_status_code(status.as_u16()))
    }
}

/// Writes payloads to the log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, target: &str, payload: &BlockPayload) -> Result<DeliveryReceipt> {
        let body = serde_json::to_string(payload)?;
        info!(target_url = %target, text = %payload.text, "dry-run notification");
        debug!(payload = %body, "dry-run payload");
        Ok(DeliveryReceipt::new(self.name()))
    }
}

/// A payload captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDelivery {
    /// Where the payload was sent.
    pub target: String,
    /// What was sent.
    pub payload: BlockPayload,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

/// In-memory sink that records deliveries, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<RecordedDelivery>>,
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
}

impl RecordingSink {
    /// Creates a sink that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every delivery, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns all successful deliveries so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().clone()
    }

    /// Number of successful deliveries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, target: &str, payload: &BlockPayload) -> Result<DeliveryReceipt> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AlertError::NotificationFailed {
                reason: "recording sink set to fail".to_string(),
            });
        }
        self.deliveries.lock().push(RecordedDelivery {
            target: target.to_string(),
            payload: payload.clone(),
            at: Utc::now(),
        });
        Ok(DeliveryReceipt::new(self.name()))
    }
}
