//! Block-structured webhook payloads.
//!
//! The format is the one chat-style incoming webhooks accept: a top-level
//! fallback `text` plus a `blocks` array of header and section elements.

use std::fmt;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sitewatch_sites::{HealthSummary, SiteMonitorConfig};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The site recorded no treatments.
    NoActivityAlert,
    /// Summary of recorded activity.
    ActivityReport,
}

impl NotificationKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoActivityAlert => "no_activity_alert",
            Self::ActivityReport => "activity_report",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TextObject {
    /// Unformatted text.
    #[serde(rename = "plain_text")]
    PlainText {
        /// The text.
        text: String,
    },
    /// Text with lightweight markup.
    #[serde(rename = "mrkdwn")]
    Markdown {
        /// The text.
        text: String,
    },
}

impl TextObject {
    /// Creates plain text.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    /// Creates markup text.
    #[must_use]
    pub fn markdown(text: impl Into<String>) -> Self {
        Self::Markdown { text: text.into() }
    }

    /// Returns the text content.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::PlainText { text } | Self::Markdown { text } => text,
        }
    }
}

/// A layout block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// A header line.
    Header {
        /// Header text, always plain.
        text: TextObject,
    },
    /// A section with optional text and a grid of fields.
    Section {
        /// Section body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<TextObject>,
        /// Two-column fields.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<TextObject>,
    },
}

/// A complete webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    /// Fallback text for clients that do not render blocks.
    pub text: String,
    /// Layout blocks.
    pub blocks: Vec<Block>,
}

impl BlockPayload {
    /// Builds the payload for a notification about one evaluation.
    #[must_use]
    pub fn build(kind: NotificationKind, config: &SiteMonitorConfig, summary: &HealthSummary) -> Self {
        let last_activity = summary.last_activity_at.map_or_else(
            || "never".to_string(),
            |ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let (text, header) = match kind {
            NotificationKind::NoActivityAlert => (
                format!(
                    "No treatment activity recorded for {} ({})",
                    config.name, config.site_id
                ),
                format!("No activity: {}", config.name),
            ),
            NotificationKind::ActivityReport => (
                format!(
                    "{} treatments recorded for {} ({})",
                    summary.total_events, config.name, config.site_id
                ),
                format!("Activity report: {}", config.name),
            ),
        };

        let fields = vec![
            TextObject::markdown(format!("*Site:*\n{}", config.name)),
            TextObject::markdown(format!("*Status:*\n{}", summary.status)),
            TextObject::markdown(format!("*Last activity:*\n{last_activity}")),
            TextObject::markdown(format!("*Events:*\n{}", summary.total_events)),
        ];

        let mut blocks = vec![
            Block::Header {
                text: TextObject::plain(header),
            },
            Block::Section { text: None, fields },
        ];

        let failed = summary.failed_events();
        if kind == NotificationKind::ActivityReport && failed > 0 {
            blocks.push(Block::Section {
                text: Some(TextObject::markdown(format!(
                    "{failed} of {} treatments failed to create",
                    summary.total_events
                ))),
                fields: Vec::new(),
            });
        }

        Self { text, blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sitewatch_sites::{Cadence, SiteStatus};

    fn config() -> SiteMonitorConfig {
        SiteMonitorConfig::new("Clinic 7", "clinic-7", Cadence::Hourly)
    }

    fn summary(total: usize, status: SiteStatus) -> HealthSummary {
        HealthSummary {
            id: "s1".to_string(),
            site_id: "clinic-7".to_string(),
            evaluated_at: Utc.with_ymd_and_hms(2025, 2, 27, 12, 0, 0).unwrap(),
            total_events: total,
            last_activity_at: (total > 0)
                .then(|| Utc.with_ymd_and_hms(2025, 2, 27, 10, 16, 2).unwrap()),
            status,
            treatments: Vec::new(),
        }
    }

    mod payload_tests {
        use super::*;

        #[test]
        fn alert_payload_fields() {
            let payload = BlockPayload::build(
                NotificationKind::NoActivityAlert,
                &config(),
                &summary(0, SiteStatus::Inactive),
            );
            assert_eq!(payload.text, "No treatment activity recorded for Clinic 7 (clinic-7)");
            assert_eq!(payload.blocks.len(), 2);

            let Block::Section { fields, .. } = &payload.blocks[1] else {
                panic!("expected section");
            };
            let texts: Vec<&str> = fields.iter().map(TextObject::text).collect();
            assert_eq!(
                texts,
                vec![
                    "*Site:*\nClinic 7",
                    "*Status:*\ninactive",
                    "*Last activity:*\nnever",
                    "*Events:*\n0"
                ]
            );
        }

        #[test]
        fn report_payload_header() {
            let payload = BlockPayload::build(
                NotificationKind::ActivityReport,
                &config(),
                &summary(4, SiteStatus::Active),
            );
            assert_eq!(payload.text, "4 treatments recorded for Clinic 7 (clinic-7)");
            assert_eq!(
                payload.blocks[0],
                Block::Header {
                    text: TextObject::plain("Activity report: Clinic 7")
                }
            );
        }

        #[test]
        fn serializes_with_type_tags() {
            let payload = BlockPayload::build(
                NotificationKind::ActivityReport,
                &config(),
                &summary(1, SiteStatus::Active),
            );
            let json = serde_json::to_value(&payload).unwrap();

            assert_eq!(json["blocks"][0]["type"], "header");
            assert_eq!(json["blocks"][0]["text"]["type"], "plain_text");
            assert_eq!(json["blocks"][1]["type"], "section");
            assert_eq!(json["blocks"][1]["fields"][0]["type"], "mrkdwn");
            assert!(json["blocks"][1].get("text").is_none());
            assert_eq!(
                json["blocks"][1]["fields"][2]["text"],
                "*Last activity:*\n2025-02-27T10:16:02Z"
            );
        }

        #[test]
        fn kind_display() {
            assert_eq!(NotificationKind::NoActivityAlert.to_string(), "no_activity_alert");
            assert_eq!(NotificationKind::ActivityReport.to_string(), "activity_report");
        }
    }
}
