//! Typed results handed between pipeline stages.
//!
//! Each stage produces one of these instead of a loose JSON blob, so the
//! contract between stages is checked at compile time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output of the capture stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Direct locator for the recording's media stream
    pub stream_url: String,

    /// Raw structured page state captured alongside the stream locator.
    /// `Null` when the capture tool produced none.
    #[serde(default)]
    pub snapshot: Value,
}

/// Output of the transcode stage.
#[derive(Debug, Clone)]
pub struct TranscodeResult {
    /// Normalized audio artifact on disk
    pub audio_path: PathBuf,

    /// Source duration probed before transcoding. `None` when the audio was
    /// already present or the probe failed.
    pub duration_seconds: Option<f64>,
}

/// One diarized speech segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Diarized speaker label (e.g. "A", "B")
    pub speaker: String,

    pub text: String,

    #[serde(default)]
    pub start_ms: u64,

    #[serde(default)]
    pub end_ms: u64,
}

/// Output of the transcription stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    /// Full transcript text
    pub text: String,

    /// Speaker-attributed segments in transcript order
    pub utterances: Vec<Utterance>,
}

/// Structured call metadata extracted from the page snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,

    /// Date/timestamp string as displayed at the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,

    /// Duration display string (e.g. "1h 30mins")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_email: Option<String>,

    /// Participant display names in page order
    #[serde(default)]
    pub participant_names: Vec<String>,

    #[serde(default)]
    pub summary: CallSummary,
}

/// Structured meeting summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    #[serde(default)]
    pub key_takeaways: Vec<String>,

    #[serde(default)]
    pub topics: Vec<TopicOutline>,

    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// One summary topic with its bullet points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicOutline {
    pub title: String,

    #[serde(default)]
    pub points: Vec<String>,
}
