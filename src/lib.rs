//! callbatch - Resumable batch extraction of recorded calls
//!
//! Takes a manifest of recorded-call pages and turns each one into a
//! canonical structured record: resolve the page to a stream, transcode
//! the audio, transcribe it with speaker diarization, extract the page
//! metadata, then merge everything and persist it.
//!
//! # Architecture
//!
//! The batch is built to be re-runnable:
//! - Every stage writes its output as an on-disk artifact and is skipped
//!   when that artifact already exists
//! - A progress ledger records completed and failed items across runs
//! - A bounded worker pool keeps at most N items in flight at once
//!
//! # Modules
//!
//! - `adapters`: External collaborators (capture command, ffmpeg, AssemblyAI)
//! - `core`: Ledger, artifact layout, merger, pipeline and scheduler
//! - `domain`: Data structures (WorkItem, stage outputs, CanonicalRecord)
//! - `store`: Record persistence (SQLite)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process a manifest of calls
//! callbatch run calls.json
//!
//! # See what a run would do
//! callbatch run calls.json --dry-run
//!
//! # Check progress
//! callbatch status calls.json
//!
//! # Drop intermediate artifacts, keeping the merged records
//! callbatch clean
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{BatchReport, BatchScheduler, ItemOutcome, ItemPipeline, ProgressLedger};
pub use domain::{CanonicalRecord, ItemId, WorkItem};
pub use store::{RecordStore, SqliteRecordStore};

// Stage collaborator seams
pub use adapters::{
    Collaborators, MetadataExtractor, SessionCapture, Transcoder, TranscriptionService,
};
