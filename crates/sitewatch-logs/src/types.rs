//! Core types for normalized log data.
//!
//! This module provides:
//! - [`Severity`] - Severity levels for log entries
//! - [`LogTimestamp`] - A timestamp that may or may not have parsed
//! - [`LogEntry`] - Canonical log entry produced by the normalizer
//! - [`TreatmentKind`] / [`TreatmentEvent`] - Imaging events recognized in log text

use std::fmt;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Log severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// General information
    #[default]
    Info,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
}

impl Severity {
    /// Returns the string representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Parses an explicit severity label as found in raw records.
    ///
    /// Returns `None` for labels that do not name a known severity.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "info" | "information" | "notice" | "debug" | "trace" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" | "err" | "fatal" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    /// Infers a severity from free message text.
    ///
    /// Case-insensitive substring match: `error` wins over `warn`, anything
    /// else is informational.
    #[must_use]
    pub fn infer(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("error") {
            Self::Error
        } else if lower.contains("warn") {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log timestamp after normalization.
///
/// Raw timestamps that cannot be interpreted are kept verbatim as
/// [`LogTimestamp::Unparsable`] so that callers can exclude them from
/// time-dependent work instead of coercing them to "now".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogTimestamp {
    /// A valid instant.
    Parsed(DateTime<Utc>),
    /// The original string that could not be parsed.
    Unparsable(String),
}

impl LogTimestamp {
    /// Parses a raw timestamp string.
    ///
    /// Tries RFC 3339 first, then the space-separated form with an implied
    /// UTC designator, then integer epoch milliseconds.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        parse_calendar(trimmed)
            .or_else(|| parse_epoch_millis(trimmed))
            .map_or_else(|| Self::Unparsable(raw.to_string()), Self::Parsed)
    }

    /// Parses a timestamp from a JSON value (string or number).
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(DateTime::from_timestamp_millis)
                .map_or_else(|| Self::Unparsable(n.to_string()), Self::Parsed),
            other => Self::Unparsable(other.to_string()),
        }
    }

    /// Returns the parsed instant, if any.
    #[must_use]
    pub const fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Parsed(ts) => Some(*ts),
            Self::Unparsable(_) => None,
        }
    }

    /// Returns true if the timestamp parsed to a valid instant.
    #[must_use]
    pub const fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    /// Canonical text form: RFC 3339 with milliseconds and `Z`, or the raw string.
    #[must_use]
    pub fn to_canonical(&self) -> String {
        match self {
            Self::Parsed(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            Self::Unparsable(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl From<DateTime<Utc>> for LogTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Parsed(truncate_to_millis(ts))
    }
}

impl Serialize for LogTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for LogTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Drops sub-millisecond precision so the canonical text form parses back
/// to the same instant.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(ts.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(ts)
}

/// Parses calendar-style timestamps only (no epoch numbers), at millisecond
/// precision.
pub(crate) fn parse_calendar(s: &str) -> Option<DateTime<Utc>> {
    parse_calendar_exact(s).map(truncate_to_millis)
}

fn parse_calendar_exact(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if s.contains(' ') {
        let joined = s.replacen(' ', "T", 1);
        // Explicit offset after the time part, e.g. "2025-02-27 10:16:02+09:00".
        if let Ok(ts) = DateTime::parse_from_rfc3339(&joined) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(&format!("{joined}Z")) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    None
}

fn parse_epoch_millis(s: &str) -> Option<DateTime<Utc>> {
    s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

/// A canonical log entry.
///
/// Entries are immutable once produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique identifier for this entry
    pub id: String,
    /// When the log line was written
    pub timestamp: LogTimestamp,
    /// The log message
    pub message: String,
    /// Stream the line was read from, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stream: Option<String>,
    /// Severity, explicit or inferred
    pub severity: Severity,
}

impl LogEntry {
    /// Returns the entry's instant if the timestamp parsed.
    #[must_use]
    pub const fn instant(&self) -> Option<DateTime<Utc>> {
        self.timestamp.instant()
    }
}

/// The kind of imaging treatment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentKind {
    /// Panoramic X-ray (the common case).
    #[default]
    Panoramic,
    /// Periapical X-ray.
    Periapical,
}

impl TreatmentKind {
    /// Classifies a message: periapical if it says so, panoramic otherwise.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        if message.to_lowercase().contains("periapical") {
            Self::Periapical
        } else {
            Self::Panoramic
        }
    }

    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Panoramic => "panoramic",
            Self::Periapical => "periapical",
        }
    }
}

impl fmt::Display for TreatmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A treatment recognized in a site's logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentEvent {
    /// Stable identifier derived from the site and source message.
    pub id: String,
    /// Pseudo-identifier for grouping; never a medical record number.
    pub patient_key: String,
    /// Masked patient name as it appears in the log.
    pub patient_display_name: String,
    /// Panoramic or periapical.
    pub kind: TreatmentKind,
    /// Whether the treatment completed.
    pub succeeded: bool,
    /// When the treatment was logged.
    pub timestamp: DateTime<Utc>,
    /// Site the log came from.
    pub site_id: String,
    /// The log message, verbatim.
    pub source_message: String,
}
