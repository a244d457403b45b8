//! Batch Integration Tests
//!
//! End-to-end scheduler runs against in-memory collaborators: failure
//! isolation, re-run skipping, mid-item resumption and the concurrency
//! bound.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use callbatch::adapters::{
    Collaborators, MetadataExtractor, SessionCapture, Transcoder, TranscriptionService,
};
use callbatch::core::{ArtifactLayout, BatchLock, BatchScheduler, ItemPipeline, ProgressLedger};
use callbatch::domain::{
    CanonicalRecord, CaptureResult, ExtractedMetadata, ItemId, TranscodeResult, TranscriptResult,
    Utterance, WorkItem,
};
use callbatch::store::{PersistedId, RecordStore};
use filetime::FileTime;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Capture fake: returns a stream URL derived from the item and a small
/// page snapshot carrying a title.
struct FakeCapture {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionCapture for FakeCapture {
    async fn capture(&self, item: &WorkItem) -> Result<CaptureResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureResult {
            stream_url: format!("https://cdn.test/{}.m3u8", item.id),
            snapshot: json!({ "title": format!("{} (page)", item.title) }),
        })
    }
}

/// Transcoder fake: writes a stub audio file where ffmpeg would.
struct FakeTranscoder {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, _stream_url: &str, output: &Path) -> Result<TranscodeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"mp3").await?;
        Ok(TranscodeResult {
            audio_path: output.to_path_buf(),
            duration_seconds: Some(480.0),
        })
    }
}

/// Transcription fake: tracks how many transcriptions run at once and can
/// fail for audio paths containing a marker string.
struct FakeTranscription {
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    fail_marker: Option<String>,
    delay: Duration,
}

#[async_trait]
impl TranscriptionService for FakeTranscription {
    async fn transcribe(&self, audio: &Path, _diagnostics: &Path) -> Result<TranscriptResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_marker {
            if audio.to_string_lossy().contains(marker.as_str()) {
                bail!("service rejected the audio");
            }
        }

        Ok(TranscriptResult {
            text: "What should we cover today? The roadmap.".to_string(),
            utterances: vec![
                Utterance {
                    speaker: "A".to_string(),
                    text: "What should we cover today?".to_string(),
                    start_ms: 0,
                    end_ms: 1500,
                },
                Utterance {
                    speaker: "B".to_string(),
                    text: "The roadmap.".to_string(),
                    start_ms: 1500,
                    end_ms: 2500,
                },
            ],
        })
    }
}

/// Metadata fake: lifts the title straight out of the page snapshot.
struct FakeMetadata {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MetadataExtractor for FakeMetadata {
    async fn extract(&self, snapshot: &Value) -> Result<ExtractedMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExtractedMetadata {
            title: snapshot
                .get("title")
                .and_then(Value::as_str)
                .map(String::from),
            ..Default::default()
        })
    }
}

/// In-memory record sink with upsert semantics keyed by item id.
#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<CanonicalRecord>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<PersistedId> {
        let mut records = self.records.lock().await;
        records.retain(|r| r.id != record.id);
        records.push(record.clone());
        Ok(PersistedId(record.id.to_string()))
    }
}

/// Everything a scheduler run needs, with call counters on every fake.
struct TestWorld {
    downloads: PathBuf,
    ledger_path: PathBuf,
    lock_path: PathBuf,
    collaborators: Collaborators,
    store: Arc<MemoryStore>,
    capture_calls: Arc<AtomicUsize>,
    transcode_calls: Arc<AtomicUsize>,
    transcription_calls: Arc<AtomicUsize>,
    metadata_calls: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl TestWorld {
    fn new(temp: &TempDir) -> Self {
        Self::configured(temp, None, 5)
    }

    fn configured(temp: &TempDir, fail_marker: Option<&str>, delay_ms: u64) -> Self {
        let capture_calls = Arc::new(AtomicUsize::new(0));
        let transcode_calls = Arc::new(AtomicUsize::new(0));
        let transcription_calls = Arc::new(AtomicUsize::new(0));
        let metadata_calls = Arc::new(AtomicUsize::new(0));
        let peak_in_flight = Arc::new(AtomicUsize::new(0));

        let collaborators = Collaborators {
            capture: Arc::new(FakeCapture {
                calls: capture_calls.clone(),
            }),
            transcoder: Arc::new(FakeTranscoder {
                calls: transcode_calls.clone(),
            }),
            transcription: Arc::new(FakeTranscription {
                calls: transcription_calls.clone(),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: peak_in_flight.clone(),
                fail_marker: fail_marker.map(String::from),
                delay: Duration::from_millis(delay_ms),
            }),
            metadata: Arc::new(FakeMetadata {
                calls: metadata_calls.clone(),
            }),
        };

        Self {
            downloads: temp.path().join("downloads"),
            ledger_path: temp.path().join("state/progress.json"),
            lock_path: temp.path().join("state/batch.lock"),
            collaborators,
            store: Arc::new(MemoryStore::default()),
            capture_calls,
            transcode_calls,
            transcription_calls,
            metadata_calls,
            peak_in_flight,
        }
    }

    /// Build a scheduler the way a fresh process would: ledger loaded from
    /// disk, everything else shared.
    fn scheduler(&self, concurrency: usize) -> BatchScheduler {
        let ledger = Arc::new(Mutex::new(ProgressLedger::load(&self.ledger_path).unwrap()));
        let pipeline = Arc::new(ItemPipeline::new(
            ArtifactLayout::new(self.downloads.clone(), 1.5),
            self.collaborators.clone(),
            self.store.clone(),
            ledger.clone(),
        ));
        BatchScheduler::new(pipeline, ledger, concurrency, self.lock_path.clone())
    }
}

fn items(n: usize) -> Vec<WorkItem> {
    (1..=n)
        .map(|i| WorkItem {
            id: ItemId::new(format!("call-{}", i)),
            title: format!("Call {}", i),
            url: format!("https://recordings.test/calls/{}", i),
        })
        .collect()
}

#[tokio::test]
async fn test_batch_processes_every_item() {
    let temp = TempDir::new().unwrap();
    let world = TestWorld::new(&temp);

    let report = world.scheduler(4).run(items(3)).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.skipped, 0);
    assert!(report.all_succeeded());

    // One record per item, titled from the page snapshot
    let records = world.store.records.lock().await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().any(|r| r.title == "Call 2 (page)"));
    assert!(records.iter().all(|r| !r.transcript_text.is_empty()));

    // Each item directory holds its merged record
    for i in 1..=3 {
        let record = world
            .downloads
            .join(format!("Call {}", i))
            .join("record.json");
        assert!(record.exists(), "missing {}", record.display());
    }
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_batch() {
    let temp = TempDir::new().unwrap();
    let world = TestWorld::configured(&temp, Some("Call 3"), 5);

    let report = world.scheduler(4).run(items(5)).await.unwrap();

    assert_eq!(report.completed, 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, ItemId::new("call-3"));
    assert!(report.failed[0].error.contains("transcription"));

    // Every item was attempted; only the bad one is missing from the store
    assert_eq!(world.transcription_calls.load(Ordering::SeqCst), 5);
    assert_eq!(world.store.records.lock().await.len(), 4);

    // The ledger on disk agrees with the report
    let ledger = ProgressLedger::load(&world.ledger_path).unwrap();
    assert!(ledger.is_completed(&ItemId::new("call-1")));
    assert!(!ledger.is_completed(&ItemId::new("call-3")));
    assert_eq!(ledger.failed().len(), 1);
}

#[tokio::test]
async fn test_second_run_skips_completed_items() {
    let temp = TempDir::new().unwrap();
    let world = TestWorld::new(&temp);

    let first = world.scheduler(4).run(items(3)).await.unwrap();
    assert_eq!(first.completed, 3);
    let ledger_bytes = std::fs::read(&world.ledger_path).unwrap();
    let record_paths: Vec<PathBuf> = (1..=3)
        .map(|i| world.downloads.join(format!("Call {}", i)).join("record.json"))
        .collect();
    let record_bytes: Vec<Vec<u8>> = record_paths
        .iter()
        .map(|p| std::fs::read(p).unwrap())
        .collect();

    // A fresh scheduler (fresh ledger load) never touches finished items
    let second = world.scheduler(4).run(items(3)).await.unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped, 3);

    assert_eq!(world.capture_calls.load(Ordering::SeqCst), 3);
    assert_eq!(world.transcode_calls.load(Ordering::SeqCst), 3);
    assert_eq!(world.transcription_calls.load(Ordering::SeqCst), 3);

    // Skipping writes nothing: the ledger and every record are byte-identical
    assert_eq!(std::fs::read(&world.ledger_path).unwrap(), ledger_bytes);
    for (path, before) in record_paths.iter().zip(&record_bytes) {
        assert_eq!(&std::fs::read(path).unwrap(), before);
    }
}

#[tokio::test]
async fn test_run_resumes_from_first_missing_artifact() {
    let temp = TempDir::new().unwrap();
    let world = TestWorld::new(&temp);

    // Seed the first two stage artifacts, as if a previous run died during
    // transcription
    let item_dir = world.downloads.join("Call 1");
    std::fs::create_dir_all(&item_dir).unwrap();
    std::fs::write(
        item_dir.join("capture.json"),
        serde_json::to_string(&json!({
            "stream_url": "https://cdn.test/seeded.m3u8",
            "snapshot": { "title": "Seeded Title" }
        }))
        .unwrap(),
    )
    .unwrap();
    let audio_path = item_dir.join("audio_1.5x.mp3");
    std::fs::write(&audio_path, b"previous run").unwrap();
    let backdated = FileTime::from_unix_time(1_400_000_000, 0);
    filetime::set_file_mtime(&audio_path, backdated).unwrap();

    let report = world.scheduler(2).run(items(1)).await.unwrap();
    assert_eq!(report.completed, 1);

    // Finished stages were not redone
    assert_eq!(world.capture_calls.load(Ordering::SeqCst), 0);
    assert_eq!(world.transcode_calls.load(Ordering::SeqCst), 0);
    assert_eq!(world.transcription_calls.load(Ordering::SeqCst), 1);
    assert_eq!(world.metadata_calls.load(Ordering::SeqCst), 1);

    // The seeded audio was reused, not rewritten
    let metadata = std::fs::metadata(&audio_path).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&metadata), backdated);

    // Downstream stages consumed the seeded capture
    let records = world.store.records.lock().await;
    assert_eq!(records[0].title, "Seeded Title");
}

#[tokio::test]
async fn test_failed_item_is_retried_on_the_next_run() {
    let temp = TempDir::new().unwrap();

    let broken = TestWorld::configured(&temp, Some("Call 3"), 5);
    let report = broken.scheduler(4).run(items(5)).await.unwrap();
    assert_eq!(report.failed.len(), 1);

    // Same state directory, healthy collaborators: only the failed item runs
    let healthy = TestWorld::new(&temp);
    let retry = healthy.scheduler(4).run(items(5)).await.unwrap();

    assert_eq!(retry.completed, 1);
    assert_eq!(retry.skipped, 4);
    assert!(retry.all_succeeded());

    // Its capture and audio artifacts survived the failed run
    assert_eq!(healthy.capture_calls.load(Ordering::SeqCst), 0);
    assert_eq!(healthy.transcode_calls.load(Ordering::SeqCst), 0);
    assert_eq!(healthy.transcription_calls.load(Ordering::SeqCst), 1);

    // Completion is recorded; the failure stays in the history
    let ledger = ProgressLedger::load(&healthy.ledger_path).unwrap();
    assert!(ledger.is_completed(&ItemId::new("call-3")));
    assert_eq!(ledger.failed().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_stays_within_bound() {
    let temp = TempDir::new().unwrap();
    let world = TestWorld::configured(&temp, None, 40);

    let report = world.scheduler(2).run(items(10)).await.unwrap();
    assert_eq!(report.completed, 10);

    let peak = world.peak_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "concurrency bound exceeded: {} in flight", peak);
    assert!(peak >= 2, "items never overlapped");
}

#[tokio::test]
async fn test_lock_holder_blocks_a_second_run() {
    let temp = TempDir::new().unwrap();
    let world = TestWorld::new(&temp);

    std::fs::create_dir_all(world.lock_path.parent().unwrap()).unwrap();
    let held = BatchLock::acquire(&world.lock_path).unwrap();

    let err = world.scheduler(2).run(items(2)).await.unwrap_err();
    assert!(format!("{:#}", err).contains("holds the lock"));

    // Nothing ran while the lock was contended
    assert_eq!(world.capture_calls.load(Ordering::SeqCst), 0);

    drop(held);
    let report = world.scheduler(2).run(items(2)).await.unwrap();
    assert_eq!(report.completed, 2);
}
