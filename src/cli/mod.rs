//! Command-line interface for callbatch.
//!
//! Provides commands for running a batch over a manifest, checking batch
//! progress, and cleaning up intermediate artifacts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;

use crate::adapters::{
    AssemblyAiTranscription, Collaborators, CommandCapture, FfmpegTranscoder,
    SnapshotMetadataExtractor,
};
use crate::config;
use crate::core::{ArtifactLayout, BatchScheduler, ItemPipeline, ProgressLedger};
use crate::domain::load_manifest;
use crate::store::SqliteRecordStore;

/// callbatch - Resumable batch extraction of recorded calls
#[derive(Parser, Debug)]
#[command(name = "callbatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the extraction batch over a manifest
    Run {
        /// Manifest file listing the calls to process
        #[arg(default_value = "calls.json")]
        manifest: PathBuf,

        /// Max items in flight at once (overrides config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// AssemblyAI API key
        #[arg(long, env = "ASSEMBLYAI_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Transcription language code (overrides config)
        #[arg(long)]
        language: Option<String>,

        /// List what would run without processing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show per-item progress for a manifest
    Status {
        /// Manifest file listing the calls
        #[arg(default_value = "calls.json")]
        manifest: PathBuf,
    },

    /// Remove intermediate artifacts, keeping merged records
    Clean {
        /// List what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                manifest,
                concurrency,
                api_key,
                language,
                dry_run,
            } => run_batch(manifest, concurrency, api_key, language, dry_run).await,
            Commands::Status { manifest } => show_status(&manifest).await,
            Commands::Clean { dry_run } => clean_artifacts(dry_run).await,
        }
    }
}

/// Run the batch over a manifest
async fn run_batch(
    manifest: PathBuf,
    concurrency: Option<usize>,
    api_key: String,
    language: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let items = load_manifest(&manifest)?;

    eprintln!("📋 {} items in {}", items.len(), manifest.display());

    let ledger = ProgressLedger::load(cfg.ledger_path())?;

    if dry_run {
        println!("{:<9} {:<18} {:<50}", "ACTION", "ID", "TITLE");
        println!("{}", "-".repeat(75));
        for item in &items {
            let action = if ledger.is_completed(&item.id) {
                "skip"
            } else {
                "process"
            };
            println!(
                "{:<9} {:<18} {:<50}",
                action,
                item.id,
                truncate_title(&item.title, 47)
            );
        }
        return Ok(());
    }

    let concurrency = concurrency.unwrap_or(cfg.batch.concurrency);
    let language = language.or_else(|| cfg.batch.language.clone());

    let transcoder =
        FfmpegTranscoder::new(cfg.batch.playback_rate, cfg.batch.audio_bitrate.clone())?;
    transcoder
        .preflight()
        .await
        .context("ffmpeg is required to transcode streams")?;

    let collaborators = Collaborators {
        capture: Arc::new(CommandCapture::new(
            cfg.capture.command.clone(),
            Duration::from_secs(cfg.capture.timeout_secs),
        )),
        transcoder: Arc::new(transcoder),
        transcription: Arc::new(AssemblyAiTranscription::new(
            api_key,
            language,
            Duration::from_secs(cfg.batch.poll_interval_secs),
        )),
        metadata: Arc::new(SnapshotMetadataExtractor),
    };

    let store = Arc::new(SqliteRecordStore::open(&cfg.records_db_path())?);
    let ledger = Arc::new(Mutex::new(ledger));
    let layout = ArtifactLayout::new(cfg.downloads.clone(), cfg.batch.playback_rate);

    let pipeline = Arc::new(ItemPipeline::new(
        layout,
        collaborators,
        store,
        Arc::clone(&ledger),
    ));
    let scheduler = BatchScheduler::new(pipeline, ledger, concurrency, cfg.lock_path());

    eprintln!("🚀 Processing {} items, {} at a time", items.len(), concurrency);

    let report = scheduler.run(items).await?;

    eprintln!();
    eprintln!("✅ Completed: {}", report.completed);
    eprintln!("⏭️  Skipped:   {}", report.skipped);
    eprintln!("❌ Failed:    {}", report.failed.len());
    eprintln!("⏱️  Elapsed:   {:.1}s", report.elapsed.as_secs_f64());
    eprintln!("📁 Artifacts: {}", cfg.downloads.display());

    if !report.all_succeeded() {
        eprintln!();
        for failure in &report.failed {
            eprintln!("   {} ({}): {}", failure.title, failure.id, failure.error);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Show per-item progress for a manifest
async fn show_status(manifest: &Path) -> Result<()> {
    let cfg = config::config()?;
    let items = load_manifest(manifest)?;
    let ledger = ProgressLedger::load(cfg.ledger_path())?;

    let failing_ids: HashSet<_> = ledger.failed().iter().map(|f| &f.id).collect();

    println!("{:<7} {:<18} {:<50}", "STATE", "ID", "TITLE");
    println!("{}", "-".repeat(75));

    let mut completed = 0usize;
    let mut failing = 0usize;
    let mut pending = 0usize;

    for item in &items {
        let state = if ledger.is_completed(&item.id) {
            completed += 1;
            "✅"
        } else if failing_ids.contains(&item.id) {
            failing += 1;
            "❌"
        } else {
            pending += 1;
            "•"
        };
        println!(
            "{:<7} {:<18} {:<50}",
            state,
            item.id,
            truncate_title(&item.title, 47)
        );
    }

    println!();
    println!(
        "Completed: {} | Failing: {} | Pending: {}",
        completed, failing, pending
    );
    println!("Failed attempts recorded: {}", ledger.failed().len());

    let store = SqliteRecordStore::open(&cfg.records_db_path())?;
    println!("Records in database: {}", store.record_count().await?);

    Ok(())
}

/// Intermediate artifacts eligible for cleanup. The merged record.json
/// stays: it is the per-item output, not an intermediate.
const INTERMEDIATE_PATTERNS: &[&str] = &[
    "capture.json",
    "audio_*.mp3",
    "*.part",
    "transcript.txt",
    "transcript_details.json",
    "speakers.json",
    "metadata.json",
];

/// Remove intermediate artifacts under the downloads directory
async fn clean_artifacts(dry_run: bool) -> Result<()> {
    let cfg = config::config()?;
    let downloads = &cfg.downloads;

    let mut files = Vec::new();
    let mut total_bytes = 0u64;

    for pattern in INTERMEDIATE_PATTERNS {
        let full = downloads.join("*").join(pattern);
        let full = full.to_string_lossy().to_string();
        for entry in
            glob::glob(&full).with_context(|| format!("Invalid glob pattern: {}", full))?
        {
            let path = entry?;
            if let Ok(metadata) = std::fs::metadata(&path) {
                total_bytes += metadata.len();
            }
            files.push(path);
        }
    }

    if files.is_empty() {
        println!("Nothing to clean under {}", downloads.display());
        return Ok(());
    }

    for path in &files {
        if dry_run {
            println!("would remove {}", path.display());
        } else {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }

    if dry_run {
        eprintln!(
            "\n🧹 {} files, {} reclaimable (dry run)",
            files.len(),
            format_size(total_bytes)
        );
    } else {
        eprintln!(
            "\n🧹 Removed {} intermediate files, freed {}",
            files.len(),
            format_size(total_bytes)
        );
    }

    Ok(())
}

fn truncate_title(title: &str, max: usize) -> String {
    if title.chars().count() > max {
        let prefix: String = title.chars().take(max).collect();
        format!("{}...", prefix)
    } else {
        title.to_string()
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("Short", 47), "Short");
        let long = "x".repeat(60);
        let truncated = truncate_title(&long, 47);
        assert_eq!(truncated.chars().count(), 50);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
