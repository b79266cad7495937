//! Daemon wiring tests.

use chrono::{TimeZone, Utc};
use sitewatch_monitor::{RunOutcome, RunTrigger};
use sitewatch_sites::{Cadence, SITES_FILE, SiteMonitorConfig, SiteStatus};
use sitewatchd::{DaemonConfig, build_scheduler};

fn config_in(dir: &std::path::Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.state_path = dir.join("state");
    config.notify.dry_run = true;
    config
}

#[test]
fn builds_scheduler_with_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let scheduler = build_scheduler(&config).unwrap();
    assert!(scheduler.store().list().unwrap().is_empty());
    assert!(config.state_path.is_dir());
}

#[test]
fn sites_survive_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let added = {
        let scheduler = build_scheduler(&config).unwrap();
        scheduler
            .add_site(SiteMonitorConfig::new("North Clinic", "clinic-7", Cadence::Daily))
            .unwrap()
    };
    assert!(config.state_path.join(SITES_FILE).exists());

    let scheduler = build_scheduler(&config).unwrap();
    let reloaded = scheduler.store().get(&added.id).unwrap();
    assert_eq!(reloaded.site_id, "clinic-7");
    assert_eq!(reloaded.cadence, Cadence::Daily);
    assert_eq!(reloaded.status, SiteStatus::Inactive);
}

#[test]
fn invalid_config_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.fetch.endpoint = "ftp://logs.example.com".to_string();

    assert!(build_scheduler(&config).is_err());
}

#[test]
fn out_of_range_windows_are_refused_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.scheduler.cooldown_secs = 10_000_000_000_000_000;
    assert!(build_scheduler(&config).is_err());

    let mut config = config_in(dir.path());
    config.notify.throttle_secs = u64::MAX;
    assert!(build_scheduler(&config).is_err());
}

#[tokio::test]
async fn manual_check_of_paused_site_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let scheduler = build_scheduler(&config).unwrap();

    let site = scheduler
        .add_site(SiteMonitorConfig::new("North Clinic", "clinic-7", Cadence::Hourly))
        .unwrap();
    scheduler.pause(&site.id).unwrap();

    let now = Utc.with_ymd_and_hms(2025, 2, 27, 12, 0, 0).unwrap();
    let outcome = scheduler.run_site(&site.id, now, RunTrigger::Manual).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Skipped(_)));
}

#[test]
fn written_sample_config_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sitewatch.toml");

    DaemonConfig::default().save(&path).unwrap();
    let loaded = DaemonConfig::from_file(&path).unwrap();
    assert_eq!(loaded, DaemonConfig::default());
}
