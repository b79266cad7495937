//! Conversion of heterogeneous raw log records into [`LogEntry`] values.
//!
//! Log-fetch responses mix three record shapes:
//! - a list of `{field, value}` pairs (query-result style, field names may carry a leading `@`)
//! - a flat object with timestamp/message-like properties
//! - an already-serialized string
//!
//! The shape is resolved once into [`RawLogRecord`]; nothing downstream
//! looks at raw shapes again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::types::{parse_calendar, LogEntry, LogTimestamp, Severity};

/// One `{field, value}` pair of a query-result style record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    /// Field name, e.g. `@timestamp`.
    pub field: String,
    /// Field value, usually a string.
    pub value: Value,
}

/// A raw log record with its shape resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RawLogRecord {
    /// A list of field/value pairs.
    Fields(Vec<RawField>),
    /// An object with direct properties.
    Object(Map<String, Value>),
    /// A serialized message string.
    Text(String),
}

impl TryFrom<Value> for RawLogRecord {
    type Error = LogError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Object(map) => Ok(Self::Object(map)),
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(LogError::UnrecognizedShape("empty field list".to_string()));
                }
                let fields = items
                    .into_iter()
                    .map(serde_json::from_value::<RawField>)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| {
                        LogError::UnrecognizedShape(format!("field list element: {e}"))
                    })?;
                Ok(Self::Fields(fields))
            }
            Value::Null => Err(LogError::UnrecognizedShape("null".to_string())),
            Value::Bool(_) => Err(LogError::UnrecognizedShape("boolean".to_string())),
            Value::Number(_) => Err(LogError::UnrecognizedShape("number".to_string())),
        }
    }
}

/// Properties pulled out of a raw record before building an entry.
#[derive(Debug, Default)]
struct Extracted {
    id: Option<String>,
    timestamp: Option<LogTimestamp>,
    message: Option<String>,
    source_stream: Option<String>,
    severity: Option<String>,
}

const TIMESTAMP_KEYS: [&str; 4] = ["timestamp", "@timestamp", "time", "ts"];
const MESSAGE_KEYS: [&str; 5] = ["message", "@message", "msg", "text", "log"];
const STREAM_KEYS: [&str; 5] = ["sourceStream", "logStream", "@logStream", "stream", "source"];
const ID_KEYS: [&str; 3] = ["id", "@ptr", "ptr"];
const SEVERITY_KEYS: [&str; 3] = ["severity", "level", "lvl"];

/// The output of normalizing a batch of raw records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Entries in input order.
    pub entries: Vec<LogEntry>,
    /// Records dropped because their shape was not recognized.
    pub dropped: usize,
    /// Entries kept with an unparsable timestamp.
    pub unparsable_timestamps: usize,
}

/// Converts raw records into canonical log entries. Pure; holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    /// Creates a new normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalizes a single resolved record.
    ///
    /// # Errors
    ///
    /// Returns `LogError::MissingField` if the record has no message.
    pub fn normalize(&self, record: RawLogRecord) -> Result<LogEntry> {
        let extracted = match record {
            RawLogRecord::Fields(fields) => Self::from_fields(fields),
            RawLogRecord::Object(map) => Self::from_object(&map),
            RawLogRecord::Text(text) => Self::from_text(&text),
        };
        Self::build(extracted)
    }

    /// Normalizes a single JSON value, resolving its shape first.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has no recognizable shape.
    pub fn normalize_value(&self, value: Value) -> Result<LogEntry> {
        self.normalize(RawLogRecord::try_from(value)?)
    }

    /// Normalizes a batch; unrecognized records are dropped and counted.
    pub fn normalize_batch(&self, values: impl IntoIterator<Item = Value>) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();

        for value in values {
            match self.normalize_value(value) {
                Ok(entry) => {
                    if !entry.timestamp.is_parsed() {
                        batch.unparsable_timestamps += 1;
                    }
                    batch.entries.push(entry);
                }
                Err(e) => {
                    debug!(error = %e, "dropping raw log record");
                    batch.dropped += 1;
                }
            }
        }

        if batch.dropped > 0 || batch.unparsable_timestamps > 0 {
            warn!(
                dropped = batch.dropped,
                unparsable_timestamps = batch.unparsable_timestamps,
                kept = batch.entries.len(),
                "malformed log records in batch"
            );
        }

        batch
    }

    fn from_fields(fields: Vec<RawField>) -> Extracted {
        let mut out = Extracted::default();
        for RawField { field, value } in fields {
            let name = field.trim_start_matches('@').to_ascii_lowercase();
            match name.as_str() {
                "timestamp" | "time" => out.timestamp = Some(LogTimestamp::from_value(&value)),
                "message" | "msg" => out.message = value_text(&value),
                "logstream" | "stream" => out.source_stream = value_text(&value),
                "ptr" | "id" => out.id = value_text(&value),
                "severity" | "level" => out.severity = value_text(&value),
                _ => {}
            }
        }
        out
    }

    fn from_object(map: &Map<String, Value>) -> Extracted {
        Extracted {
            id: lookup(map, &ID_KEYS).and_then(value_text),
            timestamp: lookup(map, &TIMESTAMP_KEYS).map(LogTimestamp::from_value),
            message: lookup(map, &MESSAGE_KEYS).and_then(value_text),
            source_stream: lookup(map, &STREAM_KEYS).and_then(value_text),
            severity: lookup(map, &SEVERITY_KEYS).and_then(value_text),
        }
    }

    fn from_text(text: &str) -> Extracted {
        let trimmed = text.trim();

        if trimmed.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
                return Self::from_object(&map);
            }
        }

        let (timestamp, message) = split_leading_timestamp(trimmed);
        Extracted {
            timestamp,
            message: Some(message.to_string()),
            ..Extracted::default()
        }
    }

    fn build(extracted: Extracted) -> Result<LogEntry> {
        let message = extracted.message.ok_or(LogError::MissingField("message"))?;
        let severity = extracted
            .severity
            .as_deref()
            .and_then(Severity::from_label)
            .unwrap_or_else(|| Severity::infer(&message));

        Ok(LogEntry {
            id: extracted
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: extracted
                .timestamp
                .unwrap_or_else(|| LogTimestamp::Unparsable(String::new())),
            message,
            source_stream: extracted.source_stream.filter(|s| !s.is_empty()),
            severity,
        })
    }
}

/// First non-null value among `keys`, in priority order.
fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Peels a leading timestamp (one token, or date and time as two tokens) off a text line.
fn split_leading_timestamp(text: &str) -> (Option<LogTimestamp>, &str) {
    let mut tokens = text.splitn(3, char::is_whitespace);
    let first = tokens.next().unwrap_or_default();
    let second = tokens.next();

    if let Some(second) = second {
        let pair = format!("{first} {second}");
        if let Some(ts) = parse_calendar(&pair) {
            let rest = text[first.len()..].trim_start()[second.len()..].trim_start();
            return (Some(LogTimestamp::Parsed(ts)), rest);
        }
    }

    if let Some(ts) = parse_calendar(first) {
        return (Some(LogTimestamp::Parsed(ts)), text[first.len()..].trim_start());
    }

    (None, text)
}
