//! sitewatchd library
//!
//! Configuration loading and scheduler wiring for the `sitewatchd` binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;

pub use app::build_scheduler;
pub use config::{
    BusinessHoursSection, DaemonConfig, FetchSection, MAX_WINDOW_SECS, NotifySection,
    SchedulerSection,
};
