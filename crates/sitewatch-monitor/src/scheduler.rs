//! Monitoring scheduler.
//!
//! Each tick re-reads the site configs and evaluates every site that is due:
//! fetch the lookback window, normalize, extract, cache, evaluate health,
//! persist the result and hand it to the alert dispatcher. Sites are
//! evaluated concurrently and independently; one site failing never stalls
//! the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sitewatch_alerts::{AlertDispatcher, DispatchOutcome, DispatchRequest};
use sitewatch_logs::{Normalizer, TreatmentEvent, TreatmentExtractor};
use sitewatch_sites::{
    HealthEvaluator, HealthSummary, SiteCache, SiteConfigPatch, SiteConfigStore,
    SiteMonitorConfig, SiteStatus,
};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::error::{MonitorError, Result};
use crate::fetch::{DEFAULT_FETCH_VERSION, LogFetchRequest, LogFetcher};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler wakes up.
    pub tick_interval: StdDuration,
    /// Minimum spacing between two triggered runs for one site.
    pub cooldown: Duration,
    /// Upper bound on one log fetch.
    pub fetch_timeout: StdDuration,
    /// API version sent to the log source.
    pub fetch_version: String,
    /// Record limit sent to the log source.
    pub fetch_limit: Option<u32>,
    /// Whether scheduled runs ask for an activity report.
    pub report_on_scheduled_runs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(15 * 60),
            cooldown: Duration::hours(2),
            fetch_timeout: StdDuration::from_secs(10),
            fetch_version: DEFAULT_FETCH_VERSION.to_string(),
            fetch_limit: None,
            report_on_scheduled_runs: true,
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    /// The periodic sweep.
    Scheduled,
    /// An operator.
    Manual,
}

/// Where a site is in its run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Waiting for the next run.
    Scheduled,
    /// An evaluation is in flight.
    Running,
    /// Deactivated by an operator.
    Paused,
}

/// Why a run did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// The site is paused.
    Paused,
    /// An evaluation for the site is already running.
    AlreadyRunning,
    /// The site was triggered too recently.
    CoolingDown {
        /// When the cooldown ends.
        until: DateTime<Utc>,
    },
    /// The site is not due yet.
    NotDue {
        /// When the site is due.
        next_run_at: DateTime<Utc>,
    },
}

/// Result of one completed evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    /// The config as persisted after the run.
    pub config: SiteMonitorConfig,
    /// Status before the run.
    pub previous_status: SiteStatus,
    /// The evaluation result.
    pub summary: HealthSummary,
    /// Raw records dropped by the normalizer.
    pub dropped_records: usize,
    /// Events found by fallback strategies.
    pub fallback_matches: usize,
    /// What the dispatcher did.
    pub dispatch: DispatchOutcome,
}

/// Result of asking the scheduler to run a site.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The site was evaluated.
    Completed(Box<EvaluationReport>),
    /// The site was not evaluated.
    Skipped(SkipReason),
    /// The evaluation started but could not finish.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl RunOutcome {
    /// Returns the report for a completed run.
    #[must_use]
    pub fn report(&self) -> Option<&EvaluationReport> {
        match self {
            Self::Completed(report) => Some(report.as_ref()),
            _ => None,
        }
    }

    /// Returns the skip reason for a skipped run.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Sites evaluated to completion.
    pub completed: usize,
    /// Sites skipped.
    pub skipped: usize,
    /// Sites whose evaluation failed.
    pub failed: usize,
    /// Per-config outcomes, keyed by config ID.
    pub outcomes: Vec<(String, RunOutcome)>,
}

impl TickReport {
    fn record(&mut self, id: String, outcome: RunOutcome) {
        match &outcome {
            RunOutcome::Completed(_) => self.completed += 1,
            RunOutcome::Skipped(_) => self.skipped += 1,
            RunOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push((id, outcome));
    }
}

/// Marks a site as running for as long as it lives.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    site_id: String,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<String>>, site_id: &str) -> Option<Self> {
        running.lock().insert(site_id.to_string()).then(|| Self {
            running,
            site_id: site_id.to_string(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.site_id);
    }
}

/// Events fetched and extracted for one site.
struct Refreshed {
    events: Vec<TreatmentEvent>,
    dropped_records: usize,
    fallback_matches: usize,
}

/// Drives periodic evaluation of all monitored sites.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn SiteConfigStore>,
    cache: Arc<dyn SiteCache>,
    fetcher: Arc<dyn LogFetcher>,
    dispatcher: Arc<AlertDispatcher>,
    evaluator: HealthEvaluator,
    normalizer: Normalizer,
    extractor: TreatmentExtractor,
    /// Site IDs with an evaluation in flight.
    running: Mutex<HashSet<String>>,
    /// Site ID -> when it was last triggered.
    last_triggered: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running", &*self.running.lock())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidConfig` if the settings are out of range,
    /// or `MonitorError::Log` if the extractor cannot be built.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn SiteConfigStore>,
        cache: Arc<dyn SiteCache>,
        fetcher: Arc<dyn LogFetcher>,
        dispatcher: Arc<AlertDispatcher>,
        evaluator: HealthEvaluator,
    ) -> Result<Self> {
        if config.tick_interval.is_zero() {
            return Err(MonitorError::InvalidConfig {
                reason: "tick interval must be positive".to_string(),
            });
        }
        if config.fetch_timeout.is_zero() {
            return Err(MonitorError::InvalidConfig {
                reason: "fetch timeout must be positive".to_string(),
            });
        }
        if config.cooldown < Duration::zero() {
            return Err(MonitorError::InvalidConfig {
                reason: "cooldown cannot be negative".to_string(),
            });
        }

        Ok(Self {
            config,
            store,
            cache,
            fetcher,
            dispatcher,
            evaluator,
            normalizer: Normalizer::new(),
            extractor: TreatmentExtractor::new()?,
            running: Mutex::new(HashSet::new()),
            last_triggered: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the scheduler settings.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns the config store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SiteConfigStore> {
        &self.store
    }

    /// Returns the site cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn SiteCache> {
        &self.cache
    }

    // ============ Site management ============

    /// Adds a site.
    pub fn add_site(&self, config: SiteMonitorConfig) -> Result<SiteMonitorConfig> {
        let added = self.store.add(config)?;
        info!(id = %added.id, site_id = %added.site_id, cadence = %added.cadence, "site added");
        Ok(added)
    }

    /// Removes a site and everything cached for it.
    pub fn remove_site(&self, id: &str) -> Result<SiteMonitorConfig> {
        let removed = self.store.delete(id)?;
        self.cache.invalidate(&removed.site_id);
        self.last_triggered.lock().remove(&removed.site_id);
        info!(id = %removed.id, site_id = %removed.site_id, "site removed");
        Ok(removed)
    }

    /// Pauses a site.
    pub fn pause(&self, id: &str) -> Result<SiteMonitorConfig> {
        let paused = self.store.update(id, &SiteConfigPatch::new().active(false))?;
        info!(id = %paused.id, site_id = %paused.site_id, "site paused");
        Ok(paused)
    }

    /// Resumes a paused site.
    pub fn resume(&self, id: &str) -> Result<SiteMonitorConfig> {
        let resumed = self.store.update(id, &SiteConfigPatch::new().active(true))?;
        info!(id = %resumed.id, site_id = %resumed.site_id, "site resumed");
        Ok(resumed)
    }

    /// Removes every site and clears the cache, cooldowns and throttles.
    pub fn reset_all(&self) -> Result<usize> {
        let removed = self.store.reset_all()?;
        self.cache.invalidate_all();
        self.last_triggered.lock().clear();
        self.dispatcher.reset();
        info!(removed, "all sites reset");
        Ok(removed)
    }

    /// Returns where a site is in its run cycle.
    pub fn state(&self, id: &str) -> Result<RunState> {
        let config = self.store.get(id)?;
        Ok(self.state_of(&config))
    }

    fn state_of(&self, config: &SiteMonitorConfig) -> RunState {
        if !config.active {
            RunState::Paused
        } else if self.running.lock().contains(&config.site_id) {
            RunState::Running
        } else {
            RunState::Scheduled
        }
    }

    // ============ Evaluation ============

    /// Evaluates every configured site that is due.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let configs = match self.store.list() {
            Ok(configs) => configs,
            Err(e) => {
                error!(error = %e, "failed to list site configs");
                return TickReport::default();
            }
        };

        let runs = configs.into_iter().map(|config| async move {
            let id = config.id.clone();
            (id, self.evaluate(config, now, RunTrigger::Scheduled).await)
        });

        let mut report = TickReport::default();
        for (id, outcome) in join_all(runs).await {
            report.record(id, outcome);
        }

        debug!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            "scheduler tick finished"
        );
        report
    }

    /// Evaluates one site by config ID.
    pub async fn run_site(&self, id: &str, now: DateTime<Utc>, trigger: RunTrigger) -> Result<RunOutcome> {
        let config = self.store.get(id)?;
        Ok(self.evaluate(config, now, trigger).await)
    }

    /// Returns a health summary for a site, served from the cache when
    /// possible. Does not update the config or notify.
    pub async fn cached_summary(&self, id: &str, now: DateTime<Utc>) -> Result<HealthSummary> {
        let config = self.store.get(id)?;
        if let Some(cached) = self.cache.get(&config.site_id) {
            debug!(site_id = %config.site_id, "serving summary from cache");
            return Ok(self.evaluator.summarize(&config.site_id, cached.events, now));
        }

        let refreshed = self.refresh(&config, now).await?;
        Ok(self.evaluator.summarize(&config.site_id, refreshed.events, now))
    }

    /// Runs the gates and, if they pass, one full evaluation.
    async fn evaluate(&self, config: SiteMonitorConfig, now: DateTime<Utc>, trigger: RunTrigger) -> RunOutcome {
        let site_id = config.site_id.clone();

        if !config.active {
            return skip(&site_id, SkipReason::Paused);
        }
        let Some(_guard) = RunningGuard::acquire(&self.running, &site_id) else {
            return skip(&site_id, SkipReason::AlreadyRunning);
        };

        if trigger == RunTrigger::Scheduled {
            let last = self.last_triggered.lock().get(&site_id).copied();
            if let Some(last) = last {
                if now - last < self.config.cooldown {
                    return skip(
                        &site_id,
                        SkipReason::CoolingDown {
                            until: last
                                .checked_add_signed(self.config.cooldown)
                                .unwrap_or(DateTime::<Utc>::MAX_UTC),
                        },
                    );
                }
            }
            if let Some(next_run_at) = config.next_run_at.filter(|next| *next > now) {
                return skip(&site_id, SkipReason::NotDue { next_run_at });
            }
        }

        self.last_triggered.lock().insert(site_id.clone(), now);
        debug!(site_id = %site_id, trigger = ?trigger, "evaluating site");

        let refreshed = match self.refresh(&config, now).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(site_id = %site_id, error = %e, "skipping evaluation, logs unavailable");
                return RunOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let summary = self.evaluator.summarize(&site_id, refreshed.events, now);
        let previous_status = config.status;

        let mut patch = SiteConfigPatch::new()
            .status(summary.status)
            .ran(now, config.cadence.next_run_after(now));
        if let Some(last) = summary.last_activity_at {
            patch = patch.last_activity_at(last);
        }

        let persisted = match self.store.update(&config.id, &patch) {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(site_id = %site_id, error = %e, "failed to persist evaluation, not notifying");
                return RunOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if previous_status != summary.status {
            info!(
                site_id = %site_id,
                from = %previous_status,
                to = %summary.status,
                events = summary.total_events,
                "site status changed"
            );
        }

        let dispatch = self
            .dispatcher
            .dispatch(DispatchRequest {
                summary: &summary,
                config: &persisted,
                previous_status,
                request_report: trigger == RunTrigger::Scheduled
                    && self.config.report_on_scheduled_runs,
                now,
            })
            .await;

        let persisted = if dispatch.no_activity_alert_sent == persisted.no_activity_alert_sent {
            persisted
        } else {
            let flag = SiteConfigPatch::new().no_activity_alert_sent(dispatch.no_activity_alert_sent);
            match self.store.update(&config.id, &flag) {
                Ok(updated) => updated,
                Err(e) => {
                    error!(site_id = %site_id, error = %e, "failed to persist alert flag");
                    persisted
                }
            }
        };

        RunOutcome::Completed(Box::new(EvaluationReport {
            config: persisted,
            previous_status,
            summary,
            dropped_records: refreshed.dropped_records,
            fallback_matches: refreshed.fallback_matches,
            dispatch,
        }))
    }

    /// Fetches, normalizes and extracts the lookback window for a site and
    /// stores the events in the cache.
    async fn refresh(&self, config: &SiteMonitorConfig, now: DateTime<Utc>) -> Result<Refreshed> {
        let ticket = self.cache.begin_refresh(&config.site_id);

        let request = LogFetchRequest::for_site(
            config.site_id.clone(),
            now - config.cadence.lookback(),
            now,
            self.config.fetch_version.clone(),
        )
        .with_limit(self.config.fetch_limit);

        let response = timeout(self.config.fetch_timeout, self.fetcher.fetch(&request))
            .await
            .map_err(|_| MonitorError::FetchTimeout {
                after_secs: self.config.fetch_timeout.as_secs(),
            })??;

        let batch = self.normalizer.normalize_batch(response.results);
        let extraction = self.extractor.extract(&config.site_id, &batch.entries);

        if !self.cache.complete_refresh(ticket, extraction.events.clone(), now) {
            debug!(site_id = %config.site_id, "cache changed during refresh, result not cached");
        }

        Ok(Refreshed {
            events: extraction.events,
            dropped_records: batch.dropped,
            fallback_matches: extraction.fallback_matches,
        })
    }

    // ============ Run loop ============

    /// Runs the scheduler until `shutdown` fires. An in-flight tick is
    /// abandoned on shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            cooldown_secs = self.config.cooldown.num_seconds(),
            "Starting site scheduler"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        report = self.tick(Utc::now()) => {
                            if report.completed + report.failed > 0 {
                                info!(
                                    completed = report.completed,
                                    failed = report.failed,
                                    skipped = report.skipped,
                                    "Evaluated sites"
                                );
                            }
                        }
                        _ = shutdown.recv() => {
                            info!("Site scheduler shutting down mid-tick");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Site scheduler shutting down");
                    break;
                }
            }
        }
    }
}

fn skip(site_id: &str, reason: SkipReason) -> RunOutcome {
    debug!(site_id = %site_id, reason = ?reason, "evaluation skipped");
    RunOutcome::Skipped(reason)
}
