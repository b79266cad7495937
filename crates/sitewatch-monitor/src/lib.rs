//! # sitewatch-monitor
//!
//! Periodic evaluation of monitored imaging sites.
//!
//! The [`Scheduler`] ties the pipeline together: it fetches raw logs through
//! a [`LogFetcher`], normalizes and extracts treatments, refreshes the site
//! cache, evaluates health, persists the result and hands it to the
//! [`AlertDispatcher`](sitewatch_alerts::AlertDispatcher).
//!
//! ## Run gates
//!
//! A site is evaluated when it is active, not already running, outside its
//! cooldown and due. Manual runs skip the cooldown and due checks only.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fetch;
pub mod scheduler;

pub use error::{MonitorError, Result};
pub use fetch::{
    DEFAULT_FETCH_VERSION, HttpLogFetcher, LogFetchRequest, LogFetchResponse, LogFetcher,
    StaticLogFetcher,
};
pub use scheduler::{
    EvaluationReport, RunOutcome, RunState, RunTrigger, Scheduler, SchedulerConfig, SkipReason,
    TickReport,
};
