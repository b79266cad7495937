//! # sitewatch-sites
//!
//! Monitored sites: their configuration, how their health is judged, and
//! the per-site cache of recognized treatments.
//!
//! This crate provides:
//!
//! - [`SiteMonitorConfig`] and [`SiteConfigPatch`] for site configuration
//! - [`SiteConfigStore`] with in-memory and JSON-file implementations
//! - [`HealthEvaluator`] and [`BusinessHours`] for status computation
//! - [`SiteCache`] with generation-checked refresh tickets
//!
//! ## Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use sitewatch_sites::{HealthEvaluator, SiteStatus};
//!
//! let evaluator = HealthEvaluator::default();
//! let now = Utc::now();
//!
//! assert_eq!(evaluator.evaluate(0, None, now), SiteStatus::Inactive);
//! assert_eq!(
//!     evaluator.evaluate(4, Some(now - Duration::minutes(10)), now),
//!     SiteStatus::Active
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod health;
pub mod store;
pub mod types;

pub use cache::{CacheStats, CachedEvents, InMemorySiteCache, RefreshTicket, SiteCache};
pub use error::{Result, SiteError};
pub use health::{BusinessHours, DEFAULT_STALE_AFTER_HOURS, HealthEvaluator};
pub use store::{JsonConfigStore, MemoryConfigStore, SITES_FILE, SiteConfigStore};
pub use types::{Cadence, HealthSummary, SiteConfigPatch, SiteMonitorConfig, SiteStatus};
