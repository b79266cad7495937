//! Evaluating a site end to end: extracted events through the health
//! evaluator, the cache and the config store.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use sitewatch_logs::{Normalizer, TreatmentExtractor};
use sitewatch_sites::{
    Cadence, HealthEvaluator, InMemorySiteCache, JsonConfigStore, SiteCache, SiteConfigPatch,
    SiteConfigStore, SiteMonitorConfig, SiteStatus,
};

fn at(d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, d, h, min, 0).unwrap()
}

#[test]
fn friday_afternoon_gap_flags_warning() {
    let raw = vec![
        json!({"timestamp": "2025-02-28T09:40:00Z", "message": "createTreatment: Treatment created successfully for He**** AR**"}),
        json!({"timestamp": "2025-02-28T10:05:00Z", "message": "createTreatment: Treatment created successfully for Jo** Le*"}),
    ];
    let batch = Normalizer::new().normalize_batch(raw);
    let report = TreatmentExtractor::new()
        .unwrap()
        .extract("clinic-7", &batch.entries);
    assert_eq!(report.events.len(), 2);

    let evaluator = HealthEvaluator::default();
    let warning = evaluator.summarize("clinic-7", report.events.clone(), at(28, 16, 59));
    assert_eq!(warning.status, SiteStatus::Warning);
    assert_eq!(warning.last_activity_at, Some(at(28, 10, 5)));

    let after_hours = evaluator.summarize("clinic-7", report.events, at(28, 17, 1));
    assert_eq!(after_hours.status, SiteStatus::Active);
}

#[test]
fn refresh_then_persist_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonConfigStore::open(dir.path()).unwrap();
    let cache = InMemorySiteCache::new();
    let config = store
        .add(SiteMonitorConfig::new("Clinic 7", "clinic-7", Cadence::Hourly))
        .unwrap();

    let ticket = cache.begin_refresh(&config.site_id);
    let summary = HealthEvaluator::default().summarize(&config.site_id, Vec::new(), at(27, 10, 16));
    assert!(cache.complete_refresh(ticket, summary.treatments.clone(), summary.evaluated_at));
    assert_eq!(cache.get(&config.site_id).unwrap().stored_at, at(27, 10, 16));

    let now = summary.evaluated_at;
    let updated = store
        .update(
            &config.id,
            &SiteConfigPatch::new()
                .status(summary.status)
                .ran(now, config.cadence.next_run_after(now)),
        )
        .unwrap();

    assert_eq!(updated.status, SiteStatus::Inactive);
    assert_eq!(updated.next_run_at, Some(at(27, 11, 0)));
    assert!(!updated.is_due(at(27, 10, 59)));
    assert_eq!(cache.get("clinic-7").unwrap().events.len(), 0);
}
