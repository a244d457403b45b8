//! Audio transcode via ffmpeg.
//!
//! Downloads the stream and re-encodes it as sped-up MP3 in a single pass.
//! Output goes to a `.part` file that is renamed into place only after
//! ffmpeg exits cleanly, so an interrupted run never leaves behind an
//! artifact that looks complete. Progress is read from `-progress pipe:1`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::TranscodeResult;

use super::Transcoder;

/// Playback rates ffmpeg's atempo filter accepts in a single pass.
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

pub struct FfmpegTranscoder {
    playback_rate: f64,
    bitrate: String,
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTranscoder {
    pub fn new(playback_rate: f64, bitrate: impl Into<String>) -> Result<Self> {
        if !(ATEMPO_MIN..=ATEMPO_MAX).contains(&playback_rate) {
            anyhow::bail!(
                "Playback rate {} outside the atempo range {}..={}",
                playback_rate,
                ATEMPO_MIN,
                ATEMPO_MAX
            );
        }

        Ok(Self {
            playback_rate,
            bitrate: bitrate.into(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        })
    }

    /// Verify ffmpeg is runnable before the batch starts.
    pub async fn preflight(&self) -> Result<()> {
        let output = Command::new(&self.ffmpeg)
            .arg("-version")
            .output()
            .await
            .context("Failed to run ffmpeg, is it installed?")?;

        if !output.status.success() {
            anyhow::bail!("ffmpeg -version exited with {}", output.status);
        }

        Ok(())
    }

    /// Probe the source duration in seconds. Best effort: probing failures
    /// only cost the progress percentage and the fallback duration.
    async fn probe_duration(&self, stream_url: &str) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(stream_url)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse::<f64>()
                .ok(),
            Ok(output) => {
                warn!(status = %output.status, "ffprobe failed, proceeding without duration");
                None
            }
            Err(err) => {
                warn!(error = %err, "Could not run ffprobe, proceeding without duration");
                None
            }
        }
    }
}

/// Parse one `-progress pipe:1` line into output-time seconds.
fn parse_out_time_ms(line: &str) -> Option<f64> {
    // The key is misnamed: values are microseconds
    let micros: f64 = line.strip_prefix("out_time_ms=")?.trim().parse().ok()?;
    Some(micros / 1_000_000.0)
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, stream_url: &str, output: &Path) -> Result<TranscodeResult> {
        let duration_seconds = self.probe_duration(stream_url).await;

        let mut part = OsString::from(output.as_os_str());
        part.push(".part");
        let part = PathBuf::from(part);

        let atempo = format!("atempo={}", self.playback_rate);
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(stream_url)
            .args([
                "-vn",
                "-filter:a",
                &atempo,
                "-acodec",
                "libmp3lame",
                "-ab",
                &self.bitrate,
                "-progress",
                "pipe:1",
            ])
            .arg(&part)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg")?;

        // Drain stderr concurrently; ffmpeg stalls if the pipe fills up.
        let mut stderr_pipe = child.stderr.take().context("ffmpeg stderr not piped")?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(done_seconds) = parse_out_time_ms(&line) {
                    // Output time runs faster than input time by the
                    // playback rate.
                    let input_seconds = done_seconds * self.playback_rate;
                    match duration_seconds {
                        Some(total) if total > 0.0 => {
                            let percent = (input_seconds / total * 100.0).min(100.0);
                            debug!(percent, "Transcoding");
                        }
                        _ => debug!(seconds = input_seconds, "Transcoding"),
                    }
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for ffmpeg")?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            anyhow::bail!(
                "ffmpeg failed with exit code {}: {}",
                exit_code,
                stderr.trim()
            );
        }

        tokio::fs::rename(&part, output)
            .await
            .with_context(|| format!("Failed to move {} into place", part.display()))?;

        Ok(TranscodeResult {
            audio_path: output.to_path_buf(),
            duration_seconds,
        })
    }
}
