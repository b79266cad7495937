//! Log fetch client.
//!
//! The log source answers a time-window query for a set of sites with raw
//! records in any of the shapes the normalizer understands.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{MonitorError, Result};

/// Default API version sent with fetch requests.
pub const DEFAULT_FETCH_VERSION: &str = "v1";

/// A time-window query for raw logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFetchRequest {
    /// Window start, epoch milliseconds.
    pub start_time: i64,
    /// Window end, epoch milliseconds.
    pub end_time: i64,
    /// Sites to query.
    pub site_ids: Vec<String>,
    /// API version.
    pub version: String,
    /// Maximum number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl LogFetchRequest {
    /// Creates a request for one site over `[start, end]`.
    #[must_use]
    pub fn for_site(
        site_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            start_time: start.timestamp_millis(),
            end_time: end.timestamp_millis(),
            site_ids: vec![site_id.into()],
            version: version.into(),
            limit: None,
        }
    }

    /// Sets the record limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
}

/// Raw records returned by the log source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFetchResponse {
    /// Records in arbitrary raw shapes.
    #[serde(default)]
    pub results: Vec<Value>,
}

/// A source of raw log records.
#[async_trait]
pub trait LogFetcher: Send + Sync + fmt::Debug {
    /// Fetches raw records for a request.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Fetch` or `MonitorError::FetchTimeout` if the
    /// source cannot be queried.
    async fn fetch(&self, request: &LogFetchRequest) -> Result<LogFetchResponse>;
}

/// Queries the log source over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLogFetcher {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpLogFetcher {
    /// Creates a fetcher posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidConfig` if the endpoint is not an
    /// http(s) URL or the client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| MonitorError::InvalidConfig {
            reason: format!("invalid fetch endpoint '{endpoint}': {e}"),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(MonitorError::InvalidConfig {
                reason: format!("fetch endpoint must use http or https, got {}", endpoint.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// The endpoint requests are posted to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LogFetcher for HttpLogFetcher {
    async fn fetch(&self, request: &LogFetchRequest) -> Result<LogFetchResponse> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MonitorError::FetchTimeout {
                        after_secs: self.timeout.as_secs(),
                    }
                } else {
                    MonitorError::Fetch {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Fetch {
                reason: format!("log source returned {status}"),
            });
        }

        let body: LogFetchResponse = response.json().await.map_err(|e| MonitorError::Fetch {
            reason: format!("invalid response body: {e}"),
        })?;
        debug!(
            sites = ?request.site_ids,
            records = body.results.len(),
            "fetched raw logs"
        );
        Ok(body)
    }
}

/// In-memory [`LogFetcher`] serving fixed records per site.
#[derive(Debug, Default)]
pub struct StaticLogFetcher {
    records: Mutex<HashMap<String, Vec<Value>>>,
    requests: Mutex<Vec<LogFetchRequest>>,
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
    failing_sites: Mutex<HashSet<String>>,
}

impl StaticLogFetcher {
    /// Creates a fetcher with no records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the records served for a site.
    pub fn set_records(&self, site_id: impl Into<String>, records: Vec<Value>) {
        self.records.lock().insert(site_id.into(), records);
    }

    /// Makes subsequent fetches fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes fetches that include `site_id` fail (or succeed again).
    pub fn set_failing_for(&self, site_id: impl Into<String>, failing: bool) {
        let mut sites = self.failing_sites.lock();
        let site_id = site_id.into();
        if failing {
            sites.insert(site_id);
        } else {
            sites.remove(&site_id);
        }
    }

    /// Delays every fetch, to exercise timeouts and overlapping runs.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<LogFetchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LogFetcher for StaticLogFetcher {
    async fn fetch(&self, request: &LogFetchRequest) -> Result<LogFetchResponse> {
        self.requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Fetch {
                reason: "static fetcher set to fail".to_string(),
            });
        }
        let failing_site = {
            let failing = self.failing_sites.lock();
            request.site_ids.iter().find(|site| failing.contains(*site)).cloned()
        };
        if let Some(site) = failing_site {
            return Err(MonitorError::Fetch {
                reason: format!("static fetcher set to fail for {site}"),
            });
        }

        let records = self.records.lock();
        let results = request
            .site_ids
            .iter()
            .filter_map(|site| records.get(site))
            .flatten()
            .cloned()
            .collect();
        Ok(LogFetchResponse { results })
    }
}
