//! Bounded-concurrency batch scheduler.
//!
//! Fans the manifest out over a fixed pool of worker tasks, funnels every
//! outcome into one report, and holds an exclusive file lock so two runs
//! never share a ledger.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::WorkItem;

use super::ledger::{FailureRecord, ProgressLedger};
use super::pipeline::{ItemOutcome, ItemPipeline};

/// Exclusive lock guarding a batch run. Released on drop.
pub struct BatchLock {
    file: File,
}

impl BatchLock {
    /// Take the lock, failing fast if another run already holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.try_lock_exclusive()
            .with_context(|| format!("Another batch run holds the lock: {}", path.display()))?;

        Ok(Self { file })
    }
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Summary of one batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: Vec<FailureRecord>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs a manifest of items through the pipeline, at most `concurrency`
/// items in flight at once.
pub struct BatchScheduler {
    pipeline: Arc<ItemPipeline>,
    ledger: Arc<Mutex<ProgressLedger>>,
    concurrency: usize,
    lock_path: PathBuf,
}

impl BatchScheduler {
    pub fn new(
        pipeline: Arc<ItemPipeline>,
        ledger: Arc<Mutex<ProgressLedger>>,
        concurrency: usize,
        lock_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            concurrency: concurrency.max(1),
            lock_path: lock_path.into(),
        }
    }

    /// Execute the batch. Item failures land in the report, not in `Err`;
    /// an error here means the run itself could not proceed.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run(&self, items: Vec<WorkItem>) -> Result<BatchReport> {
        let run_id = Uuid::new_v4();
        let total = items.len();
        info!(%run_id, total, "Batch starting");

        let _lock = BatchLock::acquire(&self.lock_path)?;
        let started = Instant::now();

        let gate = Arc::new(Semaphore::new(self.concurrency));
        let done = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        for item in items {
            let pipeline = Arc::clone(&self.pipeline);
            let ledger = Arc::clone(&self.ledger);
            let gate = Arc::clone(&gate);
            let done = Arc::clone(&done);
            let task_item = item.clone();

            let handle = tokio::spawn(async move {
                let outcome = drive_item(pipeline, ledger, gate, &task_item).await;
                let tick = done.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    item = %task_item.id,
                    outcome = outcome.label(),
                    done = tick,
                    total,
                    "Item finished"
                );
                outcome
            });
            handles.push((item, handle));
        }

        let mut completed = 0usize;
        let mut skipped = 0usize;
        let mut failed = Vec::new();

        for (item, handle) in handles {
            match handle.await {
                Ok(ItemOutcome::Completed) => completed += 1,
                Ok(ItemOutcome::Skipped) => skipped += 1,
                Ok(ItemOutcome::Failed { error }) => {
                    failed.push(FailureRecord {
                        id: item.id,
                        title: item.title,
                        error,
                        timestamp: Utc::now(),
                    });
                }
                Err(join_err) => {
                    // A panic inside a worker never reaches the ledger, so
                    // record it here before reporting.
                    let error = format!("task panicked: {}", join_err);
                    error!(item = %item.id, error = %error, "Worker task aborted");

                    let timestamp = Utc::now();
                    let mut ledger = self.ledger.lock().await;
                    if let Err(err) = ledger.mark_failed(&item.id, &item.title, &error, timestamp) {
                        warn!(error = %err, "Could not record failure in ledger");
                    }
                    failed.push(FailureRecord {
                        id: item.id,
                        title: item.title,
                        error,
                        timestamp,
                    });
                }
            }
        }

        let report = BatchReport {
            run_id,
            total,
            completed,
            skipped,
            failed,
            elapsed: started.elapsed(),
        };
        info!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed.len(),
            elapsed_secs = report.elapsed.as_secs(),
            "Batch finished"
        );

        Ok(report)
    }
}

/// Run one item: skip if the ledger already lists it, otherwise wait for a
/// permit and process. The ledger check happens before the permit so that
/// skipped items never stall admission of real work.
async fn drive_item(
    pipeline: Arc<ItemPipeline>,
    ledger: Arc<Mutex<ProgressLedger>>,
    gate: Arc<Semaphore>,
    item: &WorkItem,
) -> ItemOutcome {
    {
        let ledger = ledger.lock().await;
        if ledger.is_completed(&item.id) {
            debug!(item = %item.id, "Already completed, skipping");
            return ItemOutcome::Skipped;
        }
    }

    let _permit = match gate.acquire_owned().await {
        Ok(permit) => permit,
        // Only possible if the gate is closed, which this scheduler never does
        Err(_) => {
            return ItemOutcome::Failed {
                error: "admission gate closed".to_string(),
            }
        }
    };

    pipeline.process(item).await
}
