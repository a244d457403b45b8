//! Page capture via an external headless-browser command.
//!
//! The configured command receives the recording URL as its only argument
//! and prints a JSON document on stdout: the resolved `stream_url` plus an
//! optional `snapshot` of the rendered page for metadata extraction.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::{CaptureResult, WorkItem};

use super::SessionCapture;

/// Capture adapter that shells out to a configured command.
pub struct CommandCapture {
    command: String,
    timeout: Duration,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

/// Wire shape of the capture command's stdout.
#[derive(Debug, Deserialize)]
struct RawCapture {
    #[serde(default)]
    stream_url: Option<String>,

    #[serde(default)]
    snapshot: Option<Value>,
}

fn parse_capture_output(stdout: &[u8]) -> Result<CaptureResult> {
    let raw: RawCapture =
        serde_json::from_slice(stdout).context("Capture output is not valid JSON")?;

    let stream_url = raw
        .stream_url
        .filter(|url| !url.trim().is_empty())
        .context("No stream URL in capture output")?;

    Ok(CaptureResult {
        stream_url,
        snapshot: raw.snapshot.unwrap_or(Value::Null),
    })
}

#[async_trait]
impl SessionCapture for CommandCapture {
    async fn capture(&self, item: &WorkItem) -> Result<CaptureResult> {
        let child = Command::new(&self.command)
            .arg(&item.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reap the child if the timeout drops the future
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn capture command '{}'", self.command))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!("Capture of '{}' timed out after {:?}", item.url, self.timeout)
            })?
            .context("Failed to wait for capture command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Capture command failed with exit code {}: {}",
                exit_code,
                stderr.trim()
            );
        }

        parse_capture_output(&output.stdout)
    }
}
