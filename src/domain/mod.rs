//! Domain types for the extraction pipeline.
//!
//! - Manifest: the input work list (WorkItem, ItemId)
//! - Stages: typed results handed between pipeline stages
//! - Record: the canonical merged record that gets persisted

pub mod manifest;
pub mod record;
pub mod stages;

// Re-export commonly used types
pub use manifest::{load_manifest, sanitize_title, ItemId, WorkItem};
pub use record::{
    format_duration_display, parse_duration_minutes, CanonicalRecord, Participant,
    RecordQuestion, RecordStatus,
};
pub use stages::{
    CallSummary, CaptureResult, ExtractedMetadata, TopicOutline, TranscodeResult,
    TranscriptResult, Utterance,
};
