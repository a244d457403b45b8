//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the external tools each stage
//! depends on: the page-capture command, ffmpeg, the transcription API and
//! the snapshot metadata parser. The pipeline only sees these traits, so
//! tests can substitute in-memory fakes.

pub mod assemblyai;
pub mod capture;
pub mod ffmpeg;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{CaptureResult, ExtractedMetadata, TranscodeResult, TranscriptResult, WorkItem};

// Re-export the concrete adapters
pub use assemblyai::AssemblyAiTranscription;
pub use capture::CommandCapture;
pub use ffmpeg::FfmpegTranscoder;
pub use snapshot::SnapshotMetadataExtractor;

/// Trait for resolving a recording page into a playable stream.
#[async_trait]
pub trait SessionCapture: Send + Sync {
    /// Resolve the item's page into a stream URL plus a page snapshot.
    async fn capture(&self, item: &WorkItem) -> Result<CaptureResult>;
}

/// Trait for turning a stream into a local audio artifact.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Download and re-encode the stream into `output`.
    async fn transcode(&self, stream_url: &str, output: &Path) -> Result<TranscodeResult>;
}

/// Trait for speech-to-text with speaker diarization.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe the audio file, writing raw service responses to
    /// `diagnostics` as they arrive.
    async fn transcribe(&self, audio: &Path, diagnostics: &Path) -> Result<TranscriptResult>;
}

/// Trait for pulling structured call metadata out of a page snapshot.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Extract metadata from the captured page snapshot.
    async fn extract(&self, snapshot: &Value) -> Result<ExtractedMetadata>;
}

/// The full set of stage collaborators handed to the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn SessionCapture>,
    pub transcoder: Arc<dyn Transcoder>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub metadata: Arc<dyn MetadataExtractor>,
}
