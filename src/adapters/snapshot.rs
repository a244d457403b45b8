//! Call metadata extraction from the captured page snapshot.
//!
//! The capture command serializes the page state to JSON; this adapter
//! reshapes it into `ExtractedMetadata`. Individual missing fields degrade
//! to `None` rather than failing, since the pipeline treats metadata as
//! optional enrichment.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{CallSummary, ExtractedMetadata, TopicOutline};

use super::MetadataExtractor;

/// Extractor that reads the snapshot JSON produced at capture time.
pub struct SnapshotMetadataExtractor;

/// Snapshot shape as the capture command writes it.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    title: Option<String>,

    #[serde(default)]
    share_url: Option<String>,

    #[serde(default)]
    date: Option<String>,

    #[serde(default)]
    duration: Option<String>,

    #[serde(default)]
    host: Option<RawHost>,

    #[serde(default)]
    participants: Vec<RawParticipant>,

    #[serde(default)]
    summary: Option<RawSummary>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    email: Option<String>,
}

/// Participants appear either as bare names or as objects with a name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParticipant {
    Name(String),
    Object { name: String },
}

impl RawParticipant {
    fn into_name(self) -> String {
        match self {
            RawParticipant::Name(name) => name,
            RawParticipant::Object { name } => name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(default)]
    purpose: Option<String>,

    #[serde(default)]
    key_takeaways: Vec<String>,

    #[serde(default)]
    topics: Vec<RawTopic>,

    #[serde(default)]
    next_steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    title: String,

    #[serde(default)]
    points: Vec<String>,
}

fn extract_metadata(snapshot: &Value) -> Result<ExtractedMetadata> {
    if snapshot.is_null() {
        anyhow::bail!("Page snapshot missing from capture");
    }

    let raw: RawSnapshot = serde_json::from_value(snapshot.clone())
        .context("Snapshot does not match the expected shape")?;

    let (host_name, host_email) = match raw.host {
        Some(host) => (host.name, host.email),
        None => (None, None),
    };

    let summary = raw
        .summary
        .map(|s| CallSummary {
            purpose: non_empty(s.purpose),
            key_takeaways: s.key_takeaways,
            topics: s
                .topics
                .into_iter()
                .map(|t| TopicOutline {
                    title: t.title,
                    points: t.points,
                })
                .collect(),
            next_steps: s.next_steps,
        })
        .unwrap_or_default();

    Ok(ExtractedMetadata {
        title: non_empty(raw.title),
        share_url: non_empty(raw.share_url),
        recorded_at: non_empty(raw.date),
        duration_display: non_empty(raw.duration),
        host_name: non_empty(host_name),
        host_email: non_empty(host_email),
        participant_names: raw
            .participants
            .into_iter()
            .map(RawParticipant::into_name)
            .filter(|name| !name.trim().is_empty())
            .collect(),
        summary,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl MetadataExtractor for SnapshotMetadataExtractor {
    async fn extract(&self, snapshot: &Value) -> Result<ExtractedMetadata> {
        extract_metadata(snapshot)
    }
}
