//! Speech-to-text via the AssemblyAI REST API.
//!
//! Three-step flow: upload the audio bytes, create a transcript job with
//! speaker diarization enabled, then poll until the job reaches a terminal
//! status. Every poll response lands in the item's diagnostics file, so a
//! stuck or failed job can be inspected after the fact.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::write_atomic;
use crate::domain::{TranscriptResult, Utterance};

use super::TranscriptionService;

const BASE_URL: &str = "https://api.assemblyai.com/v2";

/// Give a job an hour of ten-second polls before declaring it stuck.
const MAX_POLLS: usize = 360;

/// Response from the upload endpoint
#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

/// Request body for creating a transcript
#[derive(Debug, Serialize)]
struct TranscriptRequest {
    audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
    speaker_labels: bool,
}

/// Response from transcript creation and polling
#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: TranscriptStatus,
    text: Option<String>,
    error: Option<String>,
    utterances: Option<Vec<RawUtterance>>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum TranscriptStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

/// One diarized segment as the API returns it (times in milliseconds)
#[derive(Debug, Deserialize)]
struct RawUtterance {
    speaker: String,
    text: String,
    #[serde(default)]
    start: u64,
    #[serde(default)]
    end: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

pub struct AssemblyAiTranscription {
    client: reqwest::Client,
    api_key: String,
    language: Option<String>,
    poll_interval: Duration,
    max_polls: usize,
}

impl AssemblyAiTranscription {
    pub fn new(api_key: String, language: Option<String>, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            language,
            poll_interval,
            max_polls: MAX_POLLS,
        }
    }

    /// Upload the audio file and get back a private URL for it
    async fn upload_audio(&self, audio: &Path) -> Result<String> {
        let upload_url = format!("{}/upload", BASE_URL);

        debug!(audio = %audio.display(), "Uploading audio to AssemblyAI");

        let audio_data = tokio::fs::read(audio)
            .await
            .with_context(|| format!("Failed to read audio file: {}", audio.display()))?;

        let response = self
            .client
            .post(&upload_url)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(audio_data)
            .send()
            .await
            .context("Failed to upload audio to AssemblyAI")?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("Failed to read upload response body")?;

        if !status.is_success() {
            anyhow::bail!(
                "AssemblyAI upload failed with status {}: {}",
                status,
                response_text
            );
        }

        let upload_response: UploadResponse =
            serde_json::from_str(&response_text).context("Failed to parse upload response")?;

        Ok(upload_response.upload_url)
    }

    /// Submit the transcription job
    async fn submit(&self, audio_url: String) -> Result<String> {
        let transcript_url = format!("{}/transcript", BASE_URL);

        let request_body = TranscriptRequest {
            audio_url,
            language_code: self.language.clone(),
            speaker_labels: true,
        };

        let response = self
            .client
            .post(&transcript_url)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .context("Failed to submit transcription request")?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("Failed to read transcription response body")?;

        if !status.is_success() {
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&response_text) {
                anyhow::bail!("AssemblyAI API error: {}", error_response.error);
            }
            anyhow::bail!(
                "AssemblyAI transcription request failed with status {}: {}",
                status,
                response_text
            );
        }

        let transcript_response: TranscriptResponse =
            serde_json::from_str(&response_text).context("Failed to parse transcription response")?;

        debug!(id = %transcript_response.id, "Transcription job submitted");
        Ok(transcript_response.id)
    }

    /// Poll the job until it completes or errors
    async fn poll(&self, transcript_id: &str, diagnostics: &Path) -> Result<TranscriptResponse> {
        let poll_url = format!("{}/transcript/{}", BASE_URL, transcript_id);

        for attempt in 1..=self.max_polls {
            debug!(attempt, max = self.max_polls, id = %transcript_id, "Polling transcription status");

            let response = self
                .client
                .get(&poll_url)
                .header("Authorization", &self.api_key)
                .send()
                .await
                .context("Failed to poll transcription status")?;

            let status = response.status();
            let response_text = response
                .text()
                .await
                .context("Failed to read poll response body")?;

            // Keep the latest full response on disk for inspection
            write_atomic(diagnostics, &response_text)?;

            if !status.is_success() {
                anyhow::bail!(
                    "AssemblyAI poll request failed with status {}: {}",
                    status,
                    response_text
                );
            }

            let transcript: TranscriptResponse =
                serde_json::from_str(&response_text).context("Failed to parse poll response")?;

            match transcript.status {
                TranscriptStatus::Completed => {
                    info!(id = %transcript_id, "Transcription complete");
                    return Ok(transcript);
                }
                TranscriptStatus::Error => {
                    let message = transcript
                        .error
                        .unwrap_or_else(|| "Unknown error".to_string());
                    anyhow::bail!("Transcription failed: {}", message);
                }
                TranscriptStatus::Queued | TranscriptStatus::Processing => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        anyhow::bail!(
            "Transcription {} never reached a terminal status after {} polls",
            transcript_id,
            self.max_polls
        )
    }
}

/// Turn a completed job response into the stage output.
fn into_transcript(response: TranscriptResponse) -> Result<TranscriptResult> {
    let text = response.text.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        anyhow::bail!("AssemblyAI returned an empty transcript");
    }

    let utterances = response
        .utterances
        .unwrap_or_default()
        .into_iter()
        .map(|u| Utterance {
            speaker: u.speaker,
            text: u.text,
            start_ms: u.start,
            end_ms: u.end,
        })
        .collect();

    Ok(TranscriptResult { text, utterances })
}

#[async_trait]
impl TranscriptionService for AssemblyAiTranscription {
    async fn transcribe(&self, audio: &Path, diagnostics: &Path) -> Result<TranscriptResult> {
        info!(audio = %audio.display(), "Transcribing via AssemblyAI");

        let audio_url = self.upload_audio(audio).await?;
        let transcript_id = self.submit(audio_url).await?;
        let response = self.poll(&transcript_id, diagnostics).await?;

        into_transcript(response)
    }
}
