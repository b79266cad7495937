//! Scheduler behaviour against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use sitewatch_alerts::{AlertDispatcher, DispatchSkip, NotificationKind, RecordingSink};
use sitewatch_monitor::{
    RunOutcome, RunState, RunTrigger, Scheduler, SchedulerConfig, SkipReason, StaticLogFetcher,
};
use sitewatch_sites::{
    Cadence, HealthEvaluator, InMemorySiteCache, MemoryConfigStore, SiteCache, SiteConfigStore,
    SiteMonitorConfig, SiteStatus,
};

struct Harness {
    scheduler: Scheduler,
    store: Arc<MemoryConfigStore>,
    cache: Arc<InMemorySiteCache>,
    fetcher: Arc<StaticLogFetcher>,
    sink: Arc<RecordingSink>,
}

fn harness(config: SchedulerConfig) -> Harness {
    let store = Arc::new(MemoryConfigStore::new());
    let cache = Arc::new(InMemorySiteCache::new());
    let fetcher = Arc::new(StaticLogFetcher::new());
    let sink = Arc::new(RecordingSink::new());
    let dispatcher = Arc::new(AlertDispatcher::new(sink.clone()));

    let scheduler = Scheduler::new(
        config,
        store.clone(),
        cache.clone(),
        fetcher.clone(),
        dispatcher,
        HealthEvaluator::default(),
    )
    .unwrap();

    Harness {
        scheduler,
        store,
        cache,
        fetcher,
        sink,
    }
}

fn no_cooldown() -> SchedulerConfig {
    SchedulerConfig {
        cooldown: Duration::zero(),
        ..SchedulerConfig::default()
    }
}

/// 2025-02-27 is a Thursday.
fn at(h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 27, h, min, 0).unwrap()
}

fn treatment(ts: &str, name: &str) -> Value {
    json!({
        "timestamp": ts,
        "message": format!("createTreatment: Treatment created successfully for {name}"),
    })
}

fn site(h: &Harness) -> SiteMonitorConfig {
    h.scheduler
        .add_site(
            SiteMonitorConfig::new("Clinic 7", "clinic-7", Cadence::Hourly)
                .with_notifications("https://hooks.example.com/services/T000/B000/XXX"),
        )
        .unwrap()
}

fn completed(outcome: &RunOutcome) -> &sitewatch_monitor::EvaluationReport {
    outcome
        .report()
        .unwrap_or_else(|| panic!("expected completed run, got {outcome:?}"))
}

#[tokio::test]
async fn tick_evaluates_persists_and_alerts() {
    let h = harness(SchedulerConfig::default());
    let config = site(&h);

    let report = h.scheduler.tick(at(10, 0)).await;
    assert_eq!(report.completed, 1);

    let stored = h.store.get(&config.id).unwrap();
    assert_eq!(stored.status, SiteStatus::Inactive);
    assert_eq!(stored.last_run_at, Some(at(10, 0)));
    assert_eq!(stored.next_run_at, Some(at(11, 0)));
    assert!(stored.no_activity_alert_sent);
    assert_eq!(h.sink.count(), 1);

    let request = &h.fetcher.requests()[0];
    assert_eq!(request.site_ids, vec!["clinic-7".to_string()]);
    assert_eq!(request.end_time - request.start_time, 24 * 3600 * 1000);
}

#[tokio::test]
async fn scheduled_runs_respect_cooldown_and_due_time() {
    let h = harness(SchedulerConfig::default());
    let config = site(&h);

    h.scheduler.tick(at(10, 0)).await;

    // Due again at 11:00 but still cooling down until 12:00.
    let outcome = h
        .scheduler
        .run_site(&config.id, at(11, 0), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(
        outcome.skip_reason(),
        Some(&SkipReason::CoolingDown { until: at(12, 0) })
    );

    let outcome = h
        .scheduler
        .run_site(&config.id, at(12, 0), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(outcome.report().is_some());
}

#[tokio::test]
async fn not_due_is_skipped() {
    let h = harness(no_cooldown());
    let config = site(&h);
    h.scheduler.tick(at(10, 0)).await;

    let outcome = h
        .scheduler
        .run_site(&config.id, at(10, 30), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(
        outcome.skip_reason(),
        Some(&SkipReason::NotDue { next_run_at: at(11, 0) })
    );
}

#[tokio::test]
async fn manual_run_bypasses_cooldown_but_not_pause() {
    let h = harness(SchedulerConfig::default());
    let config = site(&h);
    h.scheduler.tick(at(10, 0)).await;

    let outcome = h
        .scheduler
        .run_site(&config.id, at(10, 10), RunTrigger::Manual)
        .await
        .unwrap();
    assert!(outcome.report().is_some());

    h.scheduler.pause(&config.id).unwrap();
    assert_eq!(h.scheduler.state(&config.id).unwrap(), RunState::Paused);
    let outcome = h
        .scheduler
        .run_site(&config.id, at(10, 20), RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(outcome.skip_reason(), Some(&SkipReason::Paused));

    h.scheduler.resume(&config.id).unwrap();
    assert_eq!(h.scheduler.state(&config.id).unwrap(), RunState::Scheduled);
}

#[tokio::test]
async fn manual_run_does_not_request_report() {
    let h = harness(no_cooldown());
    let config = site(&h);
    h.fetcher
        .set_records("clinic-7", vec![treatment("2025-02-27T09:50:00Z", "He**** AR**")]);

    let outcome = h
        .scheduler
        .run_site(&config.id, at(10, 0), RunTrigger::Manual)
        .await
        .unwrap();
    let report = completed(&outcome);
    assert_eq!(report.summary.status, SiteStatus::Active);
    assert_eq!(report.dispatch.skipped, Some(DispatchSkip::NothingToSend));
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn concurrent_runs_for_one_site_are_refused() {
    let h = harness(no_cooldown());
    let config = site(&h);
    h.fetcher.set_delay(Some(StdDuration::from_millis(200)));

    let (first, second) = tokio::join!(
        h.scheduler.run_site(&config.id, at(10, 0), RunTrigger::Manual),
        async {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            assert_eq!(h.scheduler.state(&config.id).unwrap(), RunState::Running);
            h.scheduler.run_site(&config.id, at(10, 0), RunTrigger::Manual).await
        }
    );

    assert!(first.unwrap().report().is_some());
    assert_eq!(
        second.unwrap().skip_reason(),
        Some(&SkipReason::AlreadyRunning)
    );
    assert_eq!(h.fetcher.requests().len(), 1);
}

#[tokio::test]
async fn fetch_failure_leaves_config_untouched() {
    let h = harness(SchedulerConfig::default());
    let config = site(&h);
    h.fetcher.set_failing(true);

    let outcome = h
        .scheduler
        .run_site(&config.id, at(10, 0), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { .. }));

    let stored = h.store.get(&config.id).unwrap();
    assert_eq!(stored, config);
    assert_eq!(h.sink.count(), 0);

    // The failed attempt still counts toward the cooldown.
    h.fetcher.set_failing(false);
    let outcome = h
        .scheduler
        .run_site(&config.id, at(11, 0), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(matches!(
        outcome.skip_reason(),
        Some(SkipReason::CoolingDown { .. })
    ));
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let h = harness(SchedulerConfig {
        fetch_timeout: StdDuration::from_millis(50),
        ..no_cooldown()
    });
    let config = site(&h);
    h.fetcher.set_delay(Some(StdDuration::from_millis(500)));

    let outcome = h
        .scheduler
        .run_site(&config.id, at(10, 0), RunTrigger::Manual)
        .await
        .unwrap();
    match outcome {
        RunOutcome::Failed { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.cache.get("clinic-7").is_none());
    assert_eq!(h.store.get(&config.id).unwrap().status, SiteStatus::Inactive);
}

#[tokio::test]
async fn cached_summary_avoids_refetch() {
    let h = harness(no_cooldown());
    let config = site(&h);
    h.fetcher
        .set_records("clinic-7", vec![treatment("2025-02-27T09:50:00Z", "He**** AR**")]);

    h.scheduler.tick(at(10, 0)).await;
    assert_eq!(h.fetcher.requests().len(), 1);

    let summary = h.scheduler.cached_summary(&config.id, at(10, 5)).await.unwrap();
    assert_eq!(summary.total_events, 1);
    assert_eq!(h.fetcher.requests().len(), 1);

    h.scheduler.remove_site(&config.id).unwrap();
    assert!(h.cache.get("clinic-7").is_none());
    assert!(h.store.list().unwrap().is_empty());
}

#[tokio::test]
async fn cached_summary_fetches_on_miss() {
    let h = harness(no_cooldown());
    let config = site(&h);
    h.fetcher
        .set_records("clinic-7", vec![treatment("2025-02-27T09:50:00Z", "He**** AR**")]);

    let summary = h.scheduler.cached_summary(&config.id, at(10, 0)).await.unwrap();
    assert_eq!(summary.status, SiteStatus::Active);
    assert_eq!(h.cache.get("clinic-7").unwrap().events.len(), 1);

    // Reading a summary never touches the stored config.
    assert_eq!(h.store.get(&config.id).unwrap(), config);
}

#[tokio::test]
async fn reset_all_clears_everything() {
    let h = harness(SchedulerConfig::default());
    let config = site(&h);
    h.scheduler.tick(at(10, 0)).await;

    assert_eq!(h.scheduler.reset_all().unwrap(), 1);
    assert!(h.store.list().unwrap().is_empty());
    assert_eq!(h.cache.stats().entries, 0);

    // Cooldowns are forgotten too.
    let readded = h.scheduler.add_site(config.clone()).unwrap();
    let outcome = h
        .scheduler
        .run_site(&readded.id, at(10, 30), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(outcome.report().is_some());
}

#[tokio::test]
async fn alert_then_silence_then_report() {
    let h = harness(no_cooldown());
    let config = site(&h);
    let morning = vec![
        treatment("2025-02-27T09:40:00Z", "He**** AR**"),
        treatment("2025-02-27T09:45:00Z", "Jo** Le*"),
    ];

    // 10:00 activity, report sent.
    h.fetcher.set_records("clinic-7", morning);
    let outcome = h.scheduler.tick(at(10, 0)).await.outcomes.remove(0).1;
    let report = completed(&outcome);
    assert_eq!(report.summary.status, SiteStatus::Active);
    assert_eq!(report.dispatch.sent, Some(NotificationKind::ActivityReport));

    // 11:00 nothing in the window: alert.
    h.fetcher.set_records("clinic-7", Vec::new());
    let outcome = h.scheduler.tick(at(11, 0)).await.outcomes.remove(0).1;
    let report = completed(&outcome);
    assert_eq!(report.previous_status, SiteStatus::Active);
    assert_eq!(report.summary.status, SiteStatus::Inactive);
    assert_eq!(report.dispatch.sent, Some(NotificationKind::NoActivityAlert));
    assert!(h.store.get(&config.id).unwrap().no_activity_alert_sent);

    // 12:00 still nothing: silent.
    let outcome = h.scheduler.tick(at(12, 0)).await.outcomes.remove(0).1;
    assert_eq!(
        completed(&outcome).dispatch.skipped,
        Some(DispatchSkip::NothingToSend)
    );

    // 13:00 activity resumed: report and flag cleared.
    h.fetcher
        .set_records("clinic-7", vec![treatment("2025-02-27T12:50:00Z", "Ma*** So**")]);
    let outcome = h.scheduler.tick(at(13, 0)).await.outcomes.remove(0).1;
    let report = completed(&outcome);
    assert_eq!(report.dispatch.sent, Some(NotificationKind::ActivityReport));

    let stored = h.store.get(&config.id).unwrap();
    assert!(!stored.no_activity_alert_sent);
    assert_eq!(stored.status, SiteStatus::Active);
    assert_eq!(stored.last_activity_at, Some(at(12, 50)));
    assert_eq!(h.sink.count(), 3);
}

#[tokio::test]
async fn one_failing_site_does_not_stall_others() {
    let h = harness(no_cooldown());
    let healthy = site(&h);
    let broken = h
        .scheduler
        .add_site(SiteMonitorConfig::new("Clinic 8", "clinic-8", Cadence::Daily))
        .unwrap();
    h.fetcher.set_failing_for("clinic-8", true);

    let report = h.scheduler.tick(at(10, 0)).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);

    let outcome_for = |id: &str| {
        report
            .outcomes
            .iter()
            .find(|(config_id, _)| config_id == id)
            .map(|(_, outcome)| outcome.clone())
            .unwrap()
    };
    assert!(matches!(outcome_for(&broken.id), RunOutcome::Failed { .. }));
    let healthy_outcome = outcome_for(&healthy.id);
    assert_eq!(
        completed(&healthy_outcome).dispatch.sent,
        Some(NotificationKind::NoActivityAlert)
    );

    let stored = h.store.get(&healthy.id).unwrap();
    assert_eq!(stored.status, SiteStatus::Inactive);
    assert_eq!(stored.last_run_at, Some(at(10, 0)));
    assert!(stored.no_activity_alert_sent);
    assert_eq!(h.sink.count(), 1);

    let untouched = h.store.get(&broken.id).unwrap();
    assert_eq!(untouched.last_run_at, None);
    assert_eq!(untouched.status, broken.status);

    h.fetcher.set_failing_for("clinic-8", false);
    let report = h.scheduler.tick(at(10, 1)).await;
    assert_eq!(report.failed, 0);
    assert!(h.store.get(&broken.id).unwrap().last_run_at.is_some());
}
