//! Configuration for callbatch paths and batch settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CALLBATCH_HOME, CALLBATCH_DOWNLOADS)
//! 2. Config file (.callbatch/config.yaml)
//! 3. Defaults (~/.callbatch)
//!
//! Config file discovery:
//! - Searches current directory and parents for .callbatch/config.yaml
//! - Paths in config file are relative to the config file's parent directory
//!
//! The resolved values are read once at the CLI layer and handed to the
//! pipeline as plain arguments; nothing below the CLI touches env vars.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub batch: Option<BatchConfig>,
    #[serde(default)]
    pub capture: Option<CaptureConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory holding the ledger, lock and database (relative to config file)
    pub home: Option<String>,
    /// Per-item artifact directory (relative to config file)
    pub downloads: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub concurrency: Option<usize>,
    pub language: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub playback_rate: Option<f64>,
    pub audio_bitrate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub command: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to callbatch home (ledger, lock, database)
    pub home: PathBuf,
    /// Absolute path to the per-item artifact directory
    pub downloads: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Batch settings
    pub batch: BatchSettings,
    /// Capture settings
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub language: Option<String>,
    pub poll_interval_secs: u64,
    pub playback_rate: f64,
    pub audio_bitrate: String,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            language: Some("pt".to_string()),
            poll_interval_secs: 10,
            playback_rate: 1.5,
            audio_bitrate: "192k".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            command: "fathom-capture".to_string(),
            timeout_secs: 600,
        }
    }
}

impl ResolvedConfig {
    /// Progress ledger path ($CALLBATCH_HOME/processing_progress.json)
    pub fn ledger_path(&self) -> PathBuf {
        self.home.join("processing_progress.json")
    }

    /// Batch lock path ($CALLBATCH_HOME/batch.lock)
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("batch.lock")
    }

    /// Record database path ($CALLBATCH_HOME/calls.db)
    pub fn records_db_path(&self) -> PathBuf {
        self.home.join("calls.db")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".callbatch").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn merge_batch_settings(config: Option<&BatchConfig>) -> BatchSettings {
    let defaults = BatchSettings::default();
    BatchSettings {
        concurrency: config
            .and_then(|b| b.concurrency)
            .unwrap_or(defaults.concurrency),
        language: config
            .and_then(|b| b.language.clone())
            .or(defaults.language),
        poll_interval_secs: config
            .and_then(|b| b.poll_interval_secs)
            .unwrap_or(defaults.poll_interval_secs),
        playback_rate: config
            .and_then(|b| b.playback_rate)
            .unwrap_or(defaults.playback_rate),
        audio_bitrate: config
            .and_then(|b| b.audio_bitrate.clone())
            .unwrap_or(defaults.audio_bitrate),
    }
}

fn merge_capture_settings(config: Option<&CaptureConfig>) -> CaptureSettings {
    let defaults = CaptureSettings::default();
    CaptureSettings {
        command: config
            .and_then(|c| c.command.clone())
            .unwrap_or(defaults.command),
        timeout_secs: config
            .and_then(|c| c.timeout_secs)
            .unwrap_or(defaults.timeout_secs),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".callbatch");

    // Check for config file
    let config_file = find_config_file();

    let (home, downloads, batch, capture) = if let Some(ref config_path) = config_file {
        // Config file found - use it as base
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .callbatch/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent() // .callbatch/
            .and_then(|p| p.parent()) // project root
            .unwrap_or(Path::new("."));

        // Resolve home path
        let home = if let Ok(env_home) = std::env::var("CALLBATCH_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to .callbatch/ directory
            let callbatch_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(callbatch_dir, home_path)
        } else {
            default_home.clone()
        };

        // Resolve downloads path
        let downloads = if let Ok(env_downloads) = std::env::var("CALLBATCH_DOWNLOADS") {
            PathBuf::from(env_downloads)
        } else if let Some(ref downloads_path) = config.paths.downloads {
            resolve_path(base_dir, downloads_path)
        } else {
            home.join("downloads")
        };

        let batch = merge_batch_settings(config.batch.as_ref());
        let capture = merge_capture_settings(config.capture.as_ref());

        (home, downloads, batch, capture)
    } else {
        // No config file - use env vars or defaults
        let home = std::env::var("CALLBATCH_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let downloads = std::env::var("CALLBATCH_DOWNLOADS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("downloads"));

        (
            home,
            downloads,
            BatchSettings::default(),
            CaptureSettings::default(),
        )
    };

    if !(0.5..=2.0).contains(&batch.playback_rate) {
        anyhow::bail!(
            "playback_rate {} outside the supported range 0.5..=2.0",
            batch.playback_rate
        );
    }

    Ok(ResolvedConfig {
        home,
        downloads,
        config_file,
        batch,
        capture,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let callbatch_dir = temp.path().join(".callbatch");
        std::fs::create_dir_all(&callbatch_dir).unwrap();

        let config_path = callbatch_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  downloads: ../downloads
batch:
  concurrency: 2
  language: en
  playback_rate: 1.25
capture:
  command: my-capture
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(config.paths.downloads, Some("../downloads".to_string()));

        let batch = merge_batch_settings(config.batch.as_ref());
        assert_eq!(batch.concurrency, 2);
        assert_eq!(batch.language, Some("en".to_string()));
        assert_eq!(batch.playback_rate, 1.25);
        // Unspecified fields keep their defaults
        assert_eq!(batch.poll_interval_secs, 10);
        assert_eq!(batch.audio_bitrate, "192k");

        let capture = merge_capture_settings(config.capture.as_ref());
        assert_eq!(capture.command, "my-capture");
        assert_eq!(capture.timeout_secs, 600);
    }

    #[test]
    fn test_settings_defaults() {
        let batch = merge_batch_settings(None);
        assert_eq!(batch.concurrency, 4);
        assert_eq!(batch.playback_rate, 1.5);

        let capture = merge_capture_settings(None);
        assert_eq!(capture.command, "fathom-capture");
    }

    #[test]
    fn test_state_file_paths() {
        let config = ResolvedConfig {
            home: PathBuf::from("/test/.callbatch"),
            downloads: PathBuf::from("/test/downloads"),
            config_file: None,
            batch: BatchSettings::default(),
            capture: CaptureSettings::default(),
        };

        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/test/.callbatch/processing_progress.json")
        );
        assert_eq!(config.lock_path(), PathBuf::from("/test/.callbatch/batch.lock"));
        assert_eq!(
            config.records_db_path(),
            PathBuf::from("/test/.callbatch/calls.db")
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "../sibling"),
            PathBuf::from("/home/user/project/../sibling")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
