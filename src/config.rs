//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\tunesync\config.toml
//! - macOS: ~/Library/Application Support/tunesync/config.toml
//! - Linux: ~/.config/tunesync/config.toml
//!
//! The config file is human-readable and editable. A missing or broken file
//! never stops the engine: defaults are used and a warning is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::scanner::FilesystemCasePolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library location and database
    pub library: LibraryConfig,

    /// Heavy task processing (conversion, waveforms)
    pub processing: ProcessingConfig,

    /// Filesystem watcher settings
    pub watcher: WatcherConfig,

    /// Metadata read retries
    pub retry: RetryConfig,
}

/// Library settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root directory of the music library
    pub root: Option<PathBuf>,

    /// SQLite database file
    pub database: PathBuf,

    /// Whether to watch the root for changes after scanning
    pub watch_for_changes: bool,

    /// Case handling for path comparisons; unset means the host default
    pub case_policy: Option<FilesystemCasePolicy>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: None,
            database: PathBuf::from(crate::db::DEFAULT_DB_NAME),
            watch_for_changes: true,
            case_policy: None,
        }
    }
}

impl LibraryConfig {
    /// The configured case policy, falling back to the host platform's.
    pub fn case_policy(&self) -> FilesystemCasePolicy {
        self.case_policy
            .unwrap_or_else(FilesystemCasePolicy::host_default)
    }
}

/// Processing queue and external tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of heavy tasks allowed to run at once
    pub workers: usize,

    /// ffmpeg executable used for lossless to mp3 conversion
    pub ffmpeg: String,

    /// ffprobe executable used for duration probing
    pub ffprobe: String,

    /// Target mp3 bitrate, e.g. "320k"
    pub mp3_bitrate: String,

    /// Number of peaks stored per waveform
    pub waveform_peaks: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            mp3_bitrate: "320k".to_string(),
            waveform_peaks: 200,
        }
    }
}

/// Which watcher implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherKind {
    Native,
    Polling,
}

/// Filesystem watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: WatcherKind,

    /// Debounce window for the native watcher
    pub stability_ms: u64,

    /// Poll interval for the polling watcher
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: WatcherKind::Native,
            stability_ms: 500,
            poll_interval_ms: 2000,
        }
    }
}

/// Retry settings for reading files that may still be in flux
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tunesync"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
pub fn load() -> Config {
    match config_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::warn!("Could not determine config directory, using defaults");
            Config::default()
        }
    }
}

/// Load configuration from a specific file
///
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to a specific file
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Save configuration to the default location
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
