//! Per-item artifact layout and the stage idempotency predicate.
//!
//! Every stage writes exactly one artifact under the item's directory and
//! uses artifact presence to decide whether its work is already done. One
//! predicate serves all stages so resumability semantics cannot drift
//! between them.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::domain::sanitize_title;

/// Resolver for per-item artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
    playback_rate: f64,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>, playback_rate: f64) -> Self {
        Self {
            root: root.into(),
            playback_rate,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the artifact set for a title. Pure: the same title always
    /// yields the same paths.
    pub fn resolve(&self, title: &str) -> ItemArtifacts {
        ItemArtifacts {
            dir: self.root.join(sanitize_title(title)),
            playback_rate: self.playback_rate,
        }
    }
}

/// Stable artifact paths for one item.
#[derive(Debug, Clone)]
pub struct ItemArtifacts {
    dir: PathBuf,
    playback_rate: f64,
}

impl ItemArtifacts {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stream locator + page snapshot from the capture stage
    pub fn capture(&self) -> PathBuf {
        self.dir.join("capture.json")
    }

    /// Normalized audio. The playback rate is part of the name so a rate
    /// change re-transcodes instead of reusing mismatched audio.
    pub fn audio(&self) -> PathBuf {
        self.dir.join(format!("audio_{}x.mp3", self.playback_rate))
    }

    pub fn transcript(&self) -> PathBuf {
        self.dir.join("transcript.txt")
    }

    /// Raw transcription service responses, refreshed on every poll
    pub fn transcript_diagnostics(&self) -> PathBuf {
        self.dir.join("transcript_details.json")
    }

    pub fn speakers(&self) -> PathBuf {
        self.dir.join("speakers.json")
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn merged(&self) -> PathBuf {
        self.dir.join("record.json")
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create artifact directory: {}", self.dir.display())
        })
    }
}

/// The single idempotency predicate: a stage is already satisfied when its
/// artifact exists.
pub fn stage_complete(artifact: &Path) -> bool {
    artifact.exists()
}

/// Atomically write an artifact: temp file in the same directory, then
/// rename. A crash mid-write never leaves a partial artifact that would
/// satisfy [`stage_complete`].
pub fn write_atomic(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    file.write_all(content.as_ref())
        .with_context(|| format!("Failed to write artifact: {}", path.display()))?;
    file.flush()?;
    file.persist(path)
        .with_context(|| format!("Failed to replace artifact: {}", path.display()))?;

    Ok(())
}

/// Load a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact: {}", path.display()))
}

/// Write a JSON artifact atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_atomic(path, content.as_bytes())
}
