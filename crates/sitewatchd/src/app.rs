//! Wiring of the scheduler from daemon configuration.

use std::sync::Arc;
use std::time::Duration;

use sitewatch_alerts::{AlertDispatcher, LogSink, NotificationSink, WebhookSink};
use sitewatch_monitor::{HttpLogFetcher, LogFetcher, Result, Scheduler};
use sitewatch_sites::{InMemorySiteCache, JsonConfigStore};
use tracing::info;

use crate::config::DaemonConfig;

/// Builds a scheduler backed by the JSON store, the HTTP log source and the
/// configured notification sink.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the state directory
/// cannot be opened, or an HTTP client cannot be built.
pub fn build_scheduler(config: &DaemonConfig) -> Result<Scheduler> {
    config.validate()?;

    let store = Arc::new(JsonConfigStore::open(&config.state_path)?);
    let fetcher: Arc<dyn LogFetcher> = Arc::new(HttpLogFetcher::new(
        &config.fetch.endpoint,
        Duration::from_secs(config.fetch.timeout_secs),
    )?);

    let sink: Arc<dyn NotificationSink> = if config.notify.dry_run {
        Arc::new(LogSink)
    } else {
        Arc::new(WebhookSink::new(Duration::from_secs(config.notify.timeout_secs))?)
    };
    info!(
        sink = %sink.name(),
        store = %store.path().display(),
        endpoint = %config.fetch.endpoint,
        "building scheduler"
    );

    let dispatcher = Arc::new(
        AlertDispatcher::with_throttle(sink, config.throttle()?)
            .with_delivery_timeout(config.delivery_timeout()),
    );

    Scheduler::new(
        config.scheduler_config()?,
        store,
        Arc::new(InMemorySiteCache::new()),
        fetcher,
        dispatcher,
        config.evaluator()?,
    )
}
