//! Core extraction logic.
//!
//! This module contains:
//! - Ledger: Crash-safe progress tracking across runs
//! - Artifacts: Per-item artifact layout and idempotency checks
//! - Merger: Pure merge of stage outputs into a canonical record
//! - Pipeline: The per-item stage sequence
//! - Scheduler: Bounded-concurrency batch execution

pub mod artifacts;
pub mod ledger;
pub mod merger;
pub mod pipeline;
pub mod scheduler;

// Re-export commonly used types
pub use artifacts::{read_json, stage_complete, write_atomic, write_json, ArtifactLayout, ItemArtifacts};
pub use ledger::{FailureRecord, ProgressLedger};
pub use merger::{merge, MergeError};
pub use pipeline::{ItemOutcome, ItemPipeline, StageError};
pub use scheduler::{BatchLock, BatchReport, BatchScheduler};
