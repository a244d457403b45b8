//! Durable progress ledger: which items are done or failed across runs.
//!
//! The ledger is a single JSON snapshot rewritten wholesale on every
//! mutation. Writes go to a temp file in the snapshot's directory followed
//! by a rename, so a crash mid-write cannot leave a corrupt snapshot. A
//! missing snapshot loads as an empty ledger; a snapshot that exists but
//! does not parse is an error, never silently discarded.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::ItemId;

/// One failed attempt. Retried items accumulate one entry per failing run;
/// only success deduplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: ItemId,
    pub title: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot shape on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    /// Completed ids, kept sorted so snapshots are byte-deterministic
    #[serde(default)]
    completed_ids: BTreeSet<ItemId>,

    #[serde(default)]
    failed: Vec<FailureRecord>,
}

/// Durable, crash-safe record of batch progress.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    state: LedgerState,
}

impl ProgressLedger {
    /// Load the ledger, or start empty when no snapshot exists yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read progress ledger: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Corrupt progress ledger: {}", path.display()))?
        } else {
            LedgerState::default()
        };

        Ok(Self { path, state })
    }

    /// Mark an item completed. Idempotent: a repeat call for the same id
    /// changes nothing and writes nothing.
    pub fn mark_completed(&mut self, id: &ItemId) -> Result<()> {
        if self.state.completed_ids.insert(id.clone()) {
            self.persist()?;
        }
        Ok(())
    }

    /// Record a failed attempt. Always appends, always persists.
    pub fn mark_failed(
        &mut self,
        id: &ItemId,
        title: &str,
        error: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.state.failed.push(FailureRecord {
            id: id.clone(),
            title: title.to_string(),
            error: error.into(),
            timestamp,
        });
        self.persist()
    }

    pub fn is_completed(&self, id: &ItemId) -> bool {
        self.state.completed_ids.contains(id)
    }

    pub fn completed_count(&self) -> usize {
        self.state.completed_ids.len()
    }

    pub fn failed(&self) -> &[FailureRecord] {
        &self.state.failed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full atomic rewrite of the snapshot: write-new-then-rename.
    fn persist(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create ledger directory: {}", dir.display()))?;

        let mut file =
            NamedTempFile::new_in(dir).context("Failed to create temporary ledger file")?;
        let content = serde_json::to_string_pretty(&self.state)?;
        file.write_all(content.as_bytes())
            .context("Failed to write progress ledger")?;
        file.flush()?;
        file.persist(&self.path).with_context(|| {
            format!("Failed to replace progress ledger: {}", self.path.display())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_id(n: u32) -> ItemId {
        ItemId::new(n.to_string())
    }

    #[test]
    fn test_load_absent_is_empty() {
        let temp = TempDir::new().unwrap();
        let ledger = ProgressLedger::load(temp.path().join("progress.json")).unwrap();

        assert_eq!(ledger.completed_count(), 0);
        assert!(ledger.failed().is_empty());
    }

    #[test]
    fn test_mark_completed_persists_and_reloads() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).unwrap();
        ledger.mark_completed(&test_id(1)).unwrap();
        assert!(path.exists());

        let reloaded = ProgressLedger::load(&path).unwrap();
        assert!(reloaded.is_completed(&test_id(1)));
        assert!(!reloaded.is_completed(&test_id(2)));
    }

    #[test]
    fn test_mark_completed_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).unwrap();
        ledger.mark_completed(&test_id(1)).unwrap();
        let first = std::fs::read(&path).unwrap();

        ledger.mark_completed(&test_id(1)).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(ledger.completed_count(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_failed_accumulates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).unwrap();
        ledger
            .mark_failed(&test_id(7), "Flaky call", "transcription: timed out", Utc::now())
            .unwrap();
        ledger
            .mark_failed(&test_id(7), "Flaky call", "transcription: timed out", Utc::now())
            .unwrap();

        // Failures never deduplicate, only success does
        let reloaded = ProgressLedger::load(&path).unwrap();
        assert_eq!(reloaded.failed().len(), 2);
        assert!(!reloaded.is_completed(&test_id(7)));
    }

    #[test]
    fn test_corrupt_snapshot_propagates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = ProgressLedger::load(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Corrupt"));
    }

    #[test]
    fn test_snapshot_bytes_deterministic() {
        let temp = TempDir::new().unwrap();
        let path_a = temp.path().join("a.json");
        let path_b = temp.path().join("b.json");

        let mut a = ProgressLedger::load(&path_a).unwrap();
        a.mark_completed(&test_id(2)).unwrap();
        a.mark_completed(&test_id(1)).unwrap();

        let mut b = ProgressLedger::load(&path_b).unwrap();
        b.mark_completed(&test_id(1)).unwrap();
        b.mark_completed(&test_id(2)).unwrap();

        // Insertion order does not leak into the snapshot
        assert_eq!(
            std::fs::read(&path_a).unwrap(),
            std::fs::read(&path_b).unwrap()
        );
    }
}
