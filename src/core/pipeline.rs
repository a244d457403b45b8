//! Per-item extraction pipeline.
//!
//! Runs capture, transcode, transcribe, metadata extraction and merge for
//! one work item. Every stage checks for its artifact on disk first, so a
//! re-run after a crash resumes from the first missing artifact instead of
//! repeating finished work.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::adapters::Collaborators;
use crate::domain::{
    CanonicalRecord, CaptureResult, ExtractedMetadata, TranscodeResult, TranscriptResult,
    Utterance, WorkItem,
};
use crate::store::RecordStore;

use super::artifacts::{
    read_json, stage_complete, write_atomic, write_json, ArtifactLayout, ItemArtifacts,
};
use super::ledger::ProgressLedger;
use super::merger::{self, MergeError};

/// Error from one pipeline stage, tagged with the stage that raised it.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("capture: {0}")]
    Capture(anyhow::Error),

    #[error("transcode: {0}")]
    Transcode(anyhow::Error),

    #[error("transcription: {0}")]
    Transcription(anyhow::Error),

    #[error("merge: {0}")]
    Merge(#[from] MergeError),

    #[error("persistence: {0}")]
    Persistence(anyhow::Error),

    #[error("artifact: {0}")]
    Artifact(anyhow::Error),
}

/// Terminal outcome for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// All stages ran (or resumed) and the record was persisted
    Completed,

    /// The ledger already listed the item, so nothing ran
    Skipped,

    /// A stage failed; the error is recorded in the ledger
    Failed { error: String },
}

impl ItemOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Completed => "completed",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Failed { .. } => "failed",
        }
    }
}

/// Drives the stage sequence for single items.
pub struct ItemPipeline {
    layout: ArtifactLayout,
    collaborators: Collaborators,
    store: Arc<dyn RecordStore>,
    ledger: Arc<Mutex<ProgressLedger>>,
}

impl ItemPipeline {
    pub fn new(
        layout: ArtifactLayout,
        collaborators: Collaborators,
        store: Arc<dyn RecordStore>,
        ledger: Arc<Mutex<ProgressLedger>>,
    ) -> Self {
        Self {
            layout,
            collaborators,
            store,
            ledger,
        }
    }

    /// Process one item end to end and record the outcome in the ledger.
    ///
    /// Never returns an error: failures are absorbed into the outcome so
    /// one bad item cannot take down the batch.
    #[instrument(skip(self, item), fields(item = %item.id, title = %item.title))]
    pub async fn process(&self, item: &WorkItem) -> ItemOutcome {
        match self.run_stages(item).await {
            Ok(()) => {
                let mut ledger = self.ledger.lock().await;
                if let Err(err) = ledger.mark_completed(&item.id) {
                    // The record is persisted but the next run will redo the
                    // item; surface this so the operator looks.
                    warn!(error = %err, "Record persisted but ledger write failed");
                    return ItemOutcome::Failed {
                        error: format!("ledger: {:#}", err),
                    };
                }
                ItemOutcome::Completed
            }
            Err(stage_err) => {
                let error = stage_err.to_string();
                warn!(error = %error, "Item failed");

                let mut ledger = self.ledger.lock().await;
                if let Err(err) = ledger.mark_failed(&item.id, &item.title, &error, Utc::now()) {
                    warn!(error = %err, "Could not record failure in ledger");
                }
                ItemOutcome::Failed { error }
            }
        }
    }

    async fn run_stages(&self, item: &WorkItem) -> Result<(), StageError> {
        let artifacts = self.layout.resolve(&item.title);
        artifacts.ensure_dir().map_err(StageError::Artifact)?;

        let capture = self.capture_stage(item, &artifacts).await?;
        let transcode = self.transcode_stage(&capture, &artifacts).await?;
        let transcript = self.transcribe_stage(&transcode, &artifacts).await?;
        let metadata = self.metadata_stage(&capture, &artifacts).await;
        let record = self.merge_stage(
            item,
            &transcript,
            metadata.as_ref(),
            transcode.duration_seconds,
            &artifacts,
        )?;

        let persisted = self
            .store
            .upsert(&record)
            .await
            .map_err(StageError::Persistence)?;
        debug!(key = %persisted, "Record persisted");

        Ok(())
    }

    /// Resolve the page into a stream URL, or reuse the stored capture.
    async fn capture_stage(
        &self,
        item: &WorkItem,
        artifacts: &ItemArtifacts,
    ) -> Result<CaptureResult, StageError> {
        let path = artifacts.capture();
        if stage_complete(&path) {
            debug!("Capture artifact present, skipping");
            return read_json(&path).map_err(StageError::Artifact);
        }

        let result = self
            .collaborators
            .capture
            .capture(item)
            .await
            .map_err(StageError::Capture)?;
        write_json(&path, &result).map_err(StageError::Artifact)?;
        info!(stream_url = %result.stream_url, "Captured stream URL");

        Ok(result)
    }

    /// Produce the local audio artifact, or point at the existing one.
    async fn transcode_stage(
        &self,
        capture: &CaptureResult,
        artifacts: &ItemArtifacts,
    ) -> Result<TranscodeResult, StageError> {
        let target = artifacts.audio();
        if stage_complete(&target) {
            debug!("Audio artifact present, skipping");
            // The probed duration is lost on resume; the merger falls back
            // to page metadata, which takes precedence anyway.
            return Ok(TranscodeResult {
                audio_path: target,
                duration_seconds: None,
            });
        }

        let result = self
            .collaborators
            .transcoder
            .transcode(&capture.stream_url, &target)
            .await
            .map_err(StageError::Transcode)?;
        info!(audio = %result.audio_path.display(), "Transcode complete");

        Ok(result)
    }

    /// Transcribe the audio, or reload the stored transcript and speakers.
    async fn transcribe_stage(
        &self,
        transcode: &TranscodeResult,
        artifacts: &ItemArtifacts,
    ) -> Result<TranscriptResult, StageError> {
        let transcript_path = artifacts.transcript();
        let speakers_path = artifacts.speakers();

        // Both artifacts must exist: a transcript without its speaker
        // breakdown cannot rebuild participants or questions.
        if stage_complete(&transcript_path) && stage_complete(&speakers_path) {
            debug!("Transcript artifacts present, skipping");
            let text = std::fs::read_to_string(&transcript_path)
                .with_context(|| format!("Failed to read {}", transcript_path.display()))
                .map_err(StageError::Artifact)?;
            let utterances: Vec<Utterance> =
                read_json(&speakers_path).map_err(StageError::Artifact)?;
            return Ok(TranscriptResult { text, utterances });
        }

        let result = self
            .collaborators
            .transcription
            .transcribe(&transcode.audio_path, &artifacts.transcript_diagnostics())
            .await
            .map_err(StageError::Transcription)?;
        write_atomic(&transcript_path, &result.text).map_err(StageError::Artifact)?;
        write_json(&speakers_path, &result.utterances).map_err(StageError::Artifact)?;
        info!(utterances = result.utterances.len(), "Transcription complete");

        Ok(result)
    }

    /// Extract page metadata, degrading to `None` on any failure.
    async fn metadata_stage(
        &self,
        capture: &CaptureResult,
        artifacts: &ItemArtifacts,
    ) -> Option<ExtractedMetadata> {
        let path = artifacts.metadata();
        if stage_complete(&path) {
            match read_json(&path) {
                Ok(metadata) => return Some(metadata),
                Err(err) => warn!(error = %err, "Stored metadata unreadable, re-extracting"),
            }
        }

        match self.collaborators.metadata.extract(&capture.snapshot).await {
            Ok(metadata) => {
                if let Err(err) = write_json(&path, &metadata) {
                    warn!(error = %err, "Could not store metadata artifact");
                }
                Some(metadata)
            }
            Err(err) => {
                warn!(error = %err, "Metadata extraction degraded, continuing without it");
                None
            }
        }
    }

    /// Merge stage outputs into the canonical record, or reuse the stored
    /// record so a resumed run keeps its original extraction timestamp.
    fn merge_stage(
        &self,
        item: &WorkItem,
        transcript: &TranscriptResult,
        metadata: Option<&ExtractedMetadata>,
        fallback_duration_seconds: Option<f64>,
        artifacts: &ItemArtifacts,
    ) -> Result<CanonicalRecord, StageError> {
        let path = artifacts.merged();
        if stage_complete(&path) {
            debug!("Merged record present, reusing");
            return read_json(&path).map_err(StageError::Artifact);
        }

        let record = merger::merge(
            item,
            transcript,
            metadata,
            fallback_duration_seconds,
            Utc::now(),
        )?;
        write_json(&path, &record).map_err(StageError::Artifact)?;

        Ok(record)
    }
}
