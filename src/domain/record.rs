//! Canonical record: the merged, persisted representation of one recording.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::manifest::ItemId;
use super::stages::CallSummary;

/// Lifecycle tag on a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Produced by a successful merge
    Extracted,

    /// Synthetic record used by tests and tooling
    Test,

    /// Any other pipeline-defined tag
    #[serde(untagged)]
    Other(String),
}

impl RecordStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RecordStatus::Extracted => "extracted",
            RecordStatus::Test => "test",
            RecordStatus::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One participant on the call.
///
/// `speaker_id` links to the diarized transcript. The name attached to a
/// diarized id comes from positional matching (the first speaker to appear
/// gets the first extracted name), so when the page lists participants in a
/// different order than they first speak, names land on the wrong ids.
/// Consumers should treat participant identity as approximate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub speaker_id: String,

    pub name: String,

    #[serde(default)]
    pub is_host: bool,
}

/// A question detected in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQuestion {
    /// Diarized speaker who asked it, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,

    /// Question preview, capped at 150 characters with a trailing "..."
    pub question: String,
}

/// The merged, persisted representation of one processed recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: ItemId,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,

    pub title: String,

    /// Date as displayed at the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// ISO form (%Y-%m-%d) when the raw date parses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_formatted: Option<String>,

    /// Duration display string (e.g. "1h 30mins")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Whole minutes derived from the display string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,

    /// Domain part of the host email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_domain: Option<String>,

    #[serde(default)]
    pub participants: Vec<Participant>,

    #[serde(default)]
    pub summary: CallSummary,

    #[serde(default)]
    pub questions: Vec<RecordQuestion>,

    pub transcript_text: String,

    pub extracted_at: DateTime<Utc>,

    pub status: RecordStatus,
}

/// Parse a duration display string into whole minutes.
///
/// Grammar: an all-digit hours part before an `h` contributes `hours * 60`;
/// the digits before a `min` token (taken after the `h` when one precedes it)
/// contribute directly. Returns `None` unless the total is positive, so an
/// empty or unparsable string never becomes 0.
pub fn parse_duration_minutes(raw: &str) -> Option<u32> {
    let s = raw.to_lowercase();
    let mut total: u32 = 0;

    if let Some((hours_part, _)) = s.split_once('h') {
        let hours_part = hours_part.trim();
        if !hours_part.is_empty() && hours_part.chars().all(|c| c.is_ascii_digit()) {
            total += hours_part.parse::<u32>().unwrap_or(0).saturating_mul(60);
        }
    }

    if let Some((before_min, _)) = s.split_once("min") {
        let minutes_part = match before_min.split_once('h') {
            Some((_, after_hours)) => after_hours,
            None => before_min,
        };
        let digits: String = minutes_part.chars().filter(char::is_ascii_digit).collect();
        if let Ok(minutes) = digits.parse::<u32>() {
            total = total.saturating_add(minutes);
        }
    }

    (total > 0).then_some(total)
}

/// Format seconds into the duration display grammar used by
/// [`parse_duration_minutes`], rounding to whole minutes.
pub fn format_duration_display(seconds: f64) -> String {
    let total_minutes = (seconds / 60.0).round() as u64;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 0 && minutes > 0 {
        format!("{}h {}mins", hours, minutes)
    } else if hours > 0 {
        format!("{}h", hours)
    } else {
        format!("{} mins", minutes)
    }
}
