//! # sitewatch-logs
//!
//! Normalization of raw imaging-device logs and recognition of treatment
//! events in their free text.
//!
//! This crate provides:
//!
//! - [`Normalizer`] - Resolves heterogeneous raw records into [`LogEntry`] values
//! - [`LogTimestamp`] - Timestamps that keep the raw text when they do not parse
//! - [`Severity`] - Explicit or inferred severity
//! - [`TreatmentExtractor`] - Ordered [`ExtractionStrategy`] list producing [`TreatmentEvent`]s
//!
//! ## Example
//!
//! ```rust
//! use sitewatch_logs::{Normalizer, TreatmentExtractor, TreatmentKind};
//! use serde_json::json;
//!
//! let batch = Normalizer::new().normalize_batch(vec![json!(
//!     "2025-02-27T10:16:02Z createTreatment: Treatment created successfully for He**** AR**"
//! )]);
//!
//! let extractor = TreatmentExtractor::new().unwrap();
//! let report = extractor.extract("site-1", &batch.entries);
//!
//! assert_eq!(report.events.len(), 1);
//! assert_eq!(report.events[0].kind, TreatmentKind::Panoramic);
//! assert!(report.events[0].succeeded);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod types;

// Re-export main types
pub use error::{LogError, Result};
pub use extractor::{
    derive_patient_key, Capture, ExtractionReport, ExtractionStrategy, FunctionNameStrategy,
    MarkerStrategy, StrategyMatch, StrategyTier, TreatmentExtractor, CREATE_FUNCTION,
    FAILURE_MARKER, SUCCESS_MARKER,
};
pub use normalizer::{NormalizedBatch, Normalizer, RawField, RawLogRecord};
pub use types::{LogEntry, LogTimestamp, Severity, TreatmentEvent, TreatmentKind};
