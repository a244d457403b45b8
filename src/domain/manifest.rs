//! Work manifest: the input list of recordings to process.
//!
//! The manifest is a JSON array of objects with a required `title` and `url`
//! and an optional `id` (string or number). Unknown fields are ignored so
//! manifests exported by other tooling load as-is.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier for one recording.
///
/// Manifests usually carry an id; when one is missing it is derived from the
/// source URL (SHA256(url)[0:16]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create an ID from an explicit value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an ID from the source URL
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let result = hasher.finalize();

        // First 8 bytes = 16 hex chars
        Self(hex::encode(&result[..8]))
    }

    /// Raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recording to process. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub id: ItemId,
    pub title: String,
    pub url: String,
}

/// Manifest row as found on disk. Ids in the wild are sometimes numeric.
#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<RawId>,
    title: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl RawItem {
    fn into_work_item(self) -> WorkItem {
        let id = match self.id {
            Some(RawId::Number(n)) => ItemId::new(n.to_string()),
            Some(RawId::Text(s)) => ItemId::new(s),
            None => ItemId::from_url(&self.url),
        };

        WorkItem {
            id,
            title: self.title,
            url: self.url,
        }
    }
}

/// Load the work manifest from a JSON file, preserving its order.
pub fn load_manifest(path: &Path) -> Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;

    let raw: Vec<RawItem> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;

    Ok(raw.into_iter().map(RawItem::into_work_item).collect())
}

/// Replace filesystem-hostile characters in a title and trim whitespace.
///
/// Used for per-item directory names so titles stay recognizable on disk.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();

    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
