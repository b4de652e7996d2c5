//! Test utilities and fixtures for tunesync tests.
//!
//! Provides a temporary database plus fake collaborators so library tests
//! never shell out to ffmpeg or decode real audio.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_db, test_library};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let fakes = test_library(pool);
//!     // ... test logic
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::library::Library;
use crate::media::{AudioConverter, WaveformGenerator};
use crate::metadata::{MetadataExtractor, MetadataReader, TrackMetadata};
use crate::queue::ProcessingQueue;
use crate::retry::RetryPolicy;
use crate::scanner::FilesystemCasePolicy;

/// Creates a temporary database for testing.
///
/// Keep the returned `TempDir` alive for the duration of the test; the
/// database is deleted when it is dropped.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Write a file (creating parent directories) and return its path.
pub fn touch(path: &Path, contents: &str) -> PathBuf {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).expect("Failed to create parent directory");
    }
    std::fs::write(path, contents).expect("Failed to write file");
    path.to_path_buf()
}

/// Metadata reader answering from a per-file table.
///
/// Files without an entry read as untagged; files listed in `failing`
/// return a permanent metadata error.
#[derive(Default)]
pub struct FakeReader {
    tags: Mutex<HashMap<PathBuf, TrackMetadata>>,
    failing: Mutex<Vec<PathBuf>>,
    pub reads: AtomicUsize,
}

impl FakeReader {
    pub fn set(&self, path: &Path, meta: TrackMetadata) {
        self.tags.lock().insert(path.to_path_buf(), meta);
    }

    pub fn fail(&self, path: &Path) {
        self.failing.lock().push(path.to_path_buf());
    }
}

impl MetadataReader for FakeReader {
    fn read(&self, path: &Path) -> Result<TrackMetadata> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().iter().any(|p| p == path) {
            return Err(Error::metadata(path, "unreadable test file"));
        }
        Ok(self.tags.lock().get(path).cloned().unwrap_or_default())
    }
}

/// Converter that writes a placeholder mp3 and records every call.
#[derive(Default)]
pub struct CountingConverter {
    pub conversions: Mutex<Vec<(PathBuf, PathBuf)>>,
    /// Delay each conversion, to keep a scan in flight
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl CountingConverter {
    pub fn count(&self) -> usize {
        self.conversions.lock().len()
    }
}

#[async_trait]
impl AudioConverter for CountingConverter {
    async fn convert_to_mp3(&self, source: &Path, target: &Path) -> Result<()> {
        self.conversions
            .lock()
            .push((source.to_path_buf(), target.to_path_buf()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::conversion(source, "fake encoder failure"));
        }
        std::fs::write(target, b"fake mp3")?;
        Ok(())
    }

    async fn probe_duration(&self, _path: &Path) -> Result<Option<f64>> {
        Ok(Some(1.5))
    }
}

/// Waveform generator returning a fixed ramp.
#[derive(Default)]
pub struct FakeWaveform {
    pub calls: AtomicUsize,
}

#[async_trait]
impl WaveformGenerator for FakeWaveform {
    async fn generate(&self, _path: &Path) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.0, 0.5, 1.0])
    }
}

/// A [`Library`] wired to fakes, with handles to inspect them.
pub struct TestLibrary {
    pub library: Library,
    pub reader: Arc<FakeReader>,
    pub converter: Arc<CountingConverter>,
    pub waveform: Arc<FakeWaveform>,
}

/// Library over `pool` using fake collaborators and case-sensitive paths.
pub fn test_library(pool: SqlitePool) -> TestLibrary {
    test_library_with(pool, CountingConverter::default())
}

/// Like [`test_library`] with a custom converter.
pub fn test_library_with(pool: SqlitePool, converter: CountingConverter) -> TestLibrary {
    let reader = Arc::new(FakeReader::default());
    let converter = Arc::new(converter);
    let waveform = Arc::new(FakeWaveform::default());

    let retry = RetryPolicy::new(2, Duration::from_millis(1));
    let library = Library::new(pool, ProcessingQueue::new(1))
        .with_extractor(MetadataExtractor::new(reader.clone(), retry))
        .with_converter(converter.clone())
        .with_waveform(waveform.clone())
        .with_case_policy(FilesystemCasePolicy::Sensitive);

    TestLibrary {
        library,
        reader,
        converter,
        waveform,
    }
}
