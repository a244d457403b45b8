//! Persistence interface for canonical call records.

pub mod sqlite;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::CanonicalRecord;

pub use sqlite::SqliteRecordStore;

/// Identifier of a persisted record, as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedId(pub String);

impl fmt::Display for PersistedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for the record sink at the end of the pipeline.
///
/// Upserts must be idempotent: re-submitting the same record replaces the
/// stored row and its child rows instead of accumulating duplicates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record keyed by its item id.
    async fn upsert(&self, record: &CanonicalRecord) -> Result<PersistedId>;
}
