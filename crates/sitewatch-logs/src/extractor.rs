//! Recognition of imaging treatments in normalized log messages.
//!
//! Extraction runs an ordered list of [`ExtractionStrategy`] values. Primary
//! strategies match exact phrases; fallback strategies only run when no
//! primary strategy matched anything in the batch, and every fallback hit is
//! logged since it usually means the log wording has drifted.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{LogEntry, TreatmentEvent, TreatmentKind};

/// Phrase logged when a treatment is created.
pub const SUCCESS_MARKER: &str = "Treatment created successfully for";

/// Phrase logged when treatment creation fails.
pub const FAILURE_MARKER: &str = "Failed to create treatment for";

/// Name of the device-side function that creates treatments.
pub const CREATE_FUNCTION: &str = "createTreatment";

/// A run of masked name fragments such as `He**** AR**`.
const MASKED_RUN: &str = r"[A-Za-z0-9*]*\*[A-Za-z0-9*]*(?:[ \t]+[A-Za-z0-9*]*\*[A-Za-z0-9*]*)*";

static FALLBACK_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(&format!(
        r"{}\b.*?(?P<name>{MASKED_RUN})",
        regex::escape(CREATE_FUNCTION)
    ))
    .ok()
});

/// Whether a strategy is tried first or only as a safety net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyTier {
    /// Exact phrase match.
    Primary,
    /// Looser match, tried only if no primary strategy matched.
    Fallback,
}

/// What a strategy captured from one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// The masked display name.
    pub display_name: String,
    /// Whether the treatment completed.
    pub succeeded: bool,
}

/// Result of applying a strategy to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyMatch {
    /// The message is not a candidate for this strategy.
    NoMatch,
    /// The message is a candidate, but the captured name has the wrong shape.
    Rejected,
    /// A treatment was recognized.
    Matched(Capture),
}

/// A named way of recognizing treatments in a message.
pub trait ExtractionStrategy: Send + Sync + fmt::Debug {
    /// Returns the strategy name, used in logs.
    fn name(&self) -> &str;

    /// Returns the strategy's tier.
    fn tier(&self) -> StrategyTier;

    /// Applies the strategy to one message.
    fn apply(&self, message: &str) -> StrategyMatch;
}

/// Matches a fixed marker phrase followed by a masked name.
#[derive(Debug, Clone)]
pub struct MarkerStrategy {
    name: String,
    marker: String,
    succeeded: bool,
    pattern: Regex,
}

impl MarkerStrategy {
    /// Creates a primary strategy for `marker`.
    ///
    /// # Errors
    ///
    /// Returns `LogError::InvalidPattern` if the capture pattern cannot be built.
    pub fn new(name: impl Into<String>, marker: impl Into<String>, succeeded: bool) -> Result<Self> {
        let marker = marker.into();
        let pattern = Regex::new(&format!(
            r"{}\s+(?P<name>{MASKED_RUN})",
            regex::escape(&marker)
        ))?;
        Ok(Self {
            name: name.into(),
            marker,
            succeeded,
            pattern,
        })
    }

    /// Strategy for successful treatment creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern cannot be built.
    pub fn created_successfully() -> Result<Self> {
        Self::new("created-successfully", SUCCESS_MARKER, true)
    }

    /// Strategy for failed treatment creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern cannot be built.
    pub fn creation_failed() -> Result<Self> {
        Self::new("creation-failed", FAILURE_MARKER, false)
    }

    /// Returns the marker phrase.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl ExtractionStrategy for MarkerStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Primary
    }

    fn apply(&self, message: &str) -> StrategyMatch {
        if !message.contains(&self.marker) {
            return StrategyMatch::NoMatch;
        }
        self.pattern
            .captures(message)
            .and_then(|caps| caps.name("name"))
            .and_then(|m| masked_display_name(m.as_str()))
            .map_or(StrategyMatch::Rejected, |display_name| {
                StrategyMatch::Matched(Capture {
                    display_name,
                    succeeded: self.succeeded,
                })
            })
    }
}

/// Matches messages that mention the creation function without a known phrase.
#[derive(Debug, Clone, Default)]
pub struct FunctionNameStrategy;

impl ExtractionStrategy for FunctionNameStrategy {
    fn name(&self) -> &str {
        "create-function"
    }

    fn tier(&self) -> StrategyTier {
        StrategyTier::Fallback
    }

    fn apply(&self, message: &str) -> StrategyMatch {
        if !message.contains(CREATE_FUNCTION)
            || message.contains(SUCCESS_MARKER)
            || message.contains(FAILURE_MARKER)
        {
            return StrategyMatch::NoMatch;
        }
        let Some(pattern) = FALLBACK_PATTERN.as_ref() else {
            return StrategyMatch::NoMatch;
        };

        let lower = message.to_lowercase();
        let succeeded = !(lower.contains("fail") || lower.contains("error"));

        pattern
            .captures(message)
            .and_then(|caps| caps.name("name"))
            .and_then(|m| masked_display_name(m.as_str()))
            .map_or(StrategyMatch::Rejected, |display_name| {
                StrategyMatch::Matched(Capture {
                    display_name,
                    succeeded,
                })
            })
    }
}

/// Validates a captured token run and returns the normalized display name.
///
/// Every fragment must consist of ASCII letters, digits and `*`, contain at
/// least one letter and at least one masking `*`.
fn masked_display_name(run: &str) -> Option<String> {
    let fragments: Vec<&str> = run.split_whitespace().collect();
    if fragments.is_empty() {
        return None;
    }
    let valid = fragments.iter().all(|f| {
        f.chars().all(|c| c.is_ascii_alphanumeric() || c == '*')
            && f.contains('*')
            && f.chars().any(|c| c.is_ascii_alphabetic())
    });
    valid.then(|| fragments.join(" "))
}

/// Derives the grouping key for a masked display name.
///
/// First two characters of each fragment, then a short BLAKE3 digest of the
/// full name to separate names that share those characters.
#[must_use]
pub fn derive_patient_key(display_name: &str) -> String {
    let prefix: String = display_name
        .split_whitespace()
        .flat_map(|fragment| fragment.chars().take(2))
        .collect();
    let digest = blake3::hash(display_name.as_bytes()).to_hex();
    format!("{prefix}-{}", &digest.as_str()[..8])
}

fn event_id(site_id: &str, source_message: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(site_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(source_message.as_bytes());
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

/// The result of extracting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Recognized treatments, newest first.
    pub events: Vec<TreatmentEvent>,
    /// Messages matched by primary strategies.
    pub primary_matches: usize,
    /// Messages matched by fallback strategies.
    pub fallback_matches: usize,
    /// Candidates whose captured name had the wrong shape.
    pub rejected: usize,
    /// Matches dropped because the entry had no valid timestamp.
    pub unparsable: usize,
    /// Matches dropped as duplicates of an earlier message.
    pub duplicates: usize,
}

/// Runs extraction strategies over normalized entries.
#[derive(Debug)]
pub struct TreatmentExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl TreatmentExtractor {
    /// Creates an extractor with the standard strategies.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self::with_strategies(vec![
            Box::new(MarkerStrategy::created_successfully()?),
            Box::new(MarkerStrategy::creation_failed()?),
            Box::new(FunctionNameStrategy),
        ]))
    }

    /// Creates an extractor with custom strategies, tried in the given order within each tier.
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Returns the strategy names in order.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extracts treatment events for `site_id`.
    ///
    /// Never fails; a batch with nothing recognizable yields an empty report.
    #[must_use]
    pub fn extract(&self, site_id: &str, entries: &[LogEntry]) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let mut seen: HashSet<&str> = HashSet::new();

        report.primary_matches =
            self.run_tier(StrategyTier::Primary, site_id, entries, &mut seen, &mut report);

        if report.primary_matches == 0 {
            report.fallback_matches =
                self.run_tier(StrategyTier::Fallback, site_id, entries, &mut seen, &mut report);
            if report.fallback_matches > 0 {
                warn!(
                    site_id = %site_id,
                    fallback_matches = report.fallback_matches,
                    "no primary treatment matches; events recovered by fallback extraction"
                );
            }
        }

        report
            .events
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        debug!(
            site_id = %site_id,
            entries = entries.len(),
            events = report.events.len(),
            rejected = report.rejected,
            duplicates = report.duplicates,
            "extraction complete"
        );

        report
    }

    fn run_tier<'a>(
        &self,
        tier: StrategyTier,
        site_id: &str,
        entries: &'a [LogEntry],
        seen: &mut HashSet<&'a str>,
        report: &mut ExtractionReport,
    ) -> usize {
        let strategies: Vec<&dyn ExtractionStrategy> = self
            .strategies
            .iter()
            .filter(|s| s.tier() == tier)
            .map(|s| &**s)
            .collect();
        if strategies.is_empty() {
            return 0;
        }

        let mut matches = 0;
        for entry in entries {
            let mut rejected = false;
            let capture = strategies.iter().find_map(|strategy| {
                match strategy.apply(&entry.message) {
                    StrategyMatch::Matched(capture) => Some(capture),
                    StrategyMatch::Rejected => {
                        rejected = true;
                        None
                    }
                    StrategyMatch::NoMatch => None,
                }
            });

            let Some(capture) = capture else {
                if rejected {
                    report.rejected += 1;
                }
                continue;
            };
            matches += 1;

            let Some(timestamp) = entry.instant() else {
                report.unparsable += 1;
                continue;
            };
            if !seen.insert(entry.message.as_str()) {
                report.duplicates += 1;
                continue;
            }

            report.events.push(TreatmentEvent {
                id: event_id(site_id, &entry.message),
                patient_key: derive_patient_key(&capture.display_name),
                patient_display_name: capture.display_name,
                kind: TreatmentKind::classify(&entry.message),
                succeeded: capture.succeeded,
                timestamp,
                site_id: site_id.to_string(),
                source_message: entry.message.clone(),
            });
        }
        matches
    }
}
