//! Library reconciliation engine.
//!
//! Keeps the database in step with a directory tree of audio files and
//! sidecar configs. A full [`Library::scan_directory`] pass runs:
//!
//! 1. folder to existing-album map from stored tracks
//! 2. directory walk
//! 3. sidecar configs (artists and settings, then releases)
//! 4. pairing of every audio file, one at a time
//! 5. deduplication, stale record cleanup, orphan album repair
//!
//! After that the watcher keeps things current one file at a time through
//! [`Library::handle_event`].
//!
//! Heavy work (mp3 conversion, waveform extraction) goes through the shared
//! [`ProcessingQueue`].

mod cleanup;
mod context;
mod dedup;
mod pairing;
mod watch;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use sqlx::SqlitePool;

use crate::catalog::{self, ConfigSummary};
use crate::db;
use crate::error::{Error, Result, ResultExt};
use crate::media::{AudioConverter, FfmpegConverter, SymphoniaWaveform, WaveformGenerator};
use crate::metadata::MetadataExtractor;
use crate::queue::{ProcessingQueue, TaskHandle};
use crate::scanner::{self, FilesystemCasePolicy};

pub use cleanup::{CleanupReport, OrphanReport};
pub use context::{AlbumRef, RELEASE_AUDIO_SUBDIRS, ScanContext};
pub use dedup::DedupReport;
pub use pairing::{PairAction, PairOutcome};
pub use watch::WatchOutcome;

type SharedScan = Shared<BoxFuture<'static, std::result::Result<ScanReport, Arc<Error>>>>;

/// A file that could not be paired.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of a full scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Audio files paired successfully
    pub successful: usize,
    /// Audio files that failed to pair
    pub failed: usize,
    pub failures: Vec<FileFailure>,
    /// Sidecar configs applied and skipped
    pub configs: ConfigSummary,
    pub dedup: DedupReport,
    pub cleanup: CleanupReport,
    pub orphans: OrphanReport,
}

/// The reconciliation engine and its collaborators.
///
/// Cheap to clone; clones share the queue and the in-flight scan table.
#[derive(Clone)]
pub struct Library {
    pool: SqlitePool,
    queue: ProcessingQueue,
    extractor: MetadataExtractor,
    converter: Arc<dyn AudioConverter>,
    waveform: Arc<dyn WaveformGenerator>,
    case_policy: FilesystemCasePolicy,
    scans: Arc<Mutex<HashMap<String, SharedScan>>>,
    waveforms_pending: Arc<Mutex<HashSet<i64>>>,
}

impl Library {
    /// Engine with the production collaborators: lofty, ffmpeg and symphonia.
    pub fn new(pool: SqlitePool, queue: ProcessingQueue) -> Self {
        Self {
            pool,
            queue,
            extractor: MetadataExtractor::lofty(),
            converter: Arc::new(FfmpegConverter::default()),
            waveform: Arc::new(SymphoniaWaveform::default()),
            case_policy: FilesystemCasePolicy::host_default(),
            scans: Arc::new(Mutex::new(HashMap::new())),
            waveforms_pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_extractor(mut self, extractor: MetadataExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn AudioConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_waveform(mut self, waveform: Arc<dyn WaveformGenerator>) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn with_case_policy(mut self, case_policy: FilesystemCasePolicy) -> Self {
        self.case_policy = case_policy;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    /// Run a full scan of `root`.
    ///
    /// Only one scan per root runs at a time; concurrent callers share the
    /// in-flight scan's result. A missing root yields an empty report; only a
    /// failed directory walk is an error.
    pub async fn scan_directory(&self, root: impl AsRef<Path>) -> Result<ScanReport> {
        let root = match tokio::fs::canonicalize(root.as_ref()).await {
            Ok(root) => root,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(target: "library::scan", root = %root.as_ref().display(), "Scan root does not exist");
                return Ok(ScanReport::default());
            }
            Err(e) => {
                return Err(Error::Io(e)
                    .context(format!("resolving scan root {}", root.as_ref().display())));
            }
        };
        let key = self.case_policy.dir_key(&root);

        let scan = {
            let mut scans = self.scans.lock();
            match scans.get(&key) {
                Some(existing) => {
                    tracing::info!(target: "library::scan", root = %root.display(), "Scan already running, joining it");
                    existing.clone()
                }
                None => {
                    let this = self.clone();
                    let finished_key = key.clone();
                    let scan = async move {
                        let result = this.run_scan(&root).await.map_err(Arc::new);
                        this.scans.lock().remove(&finished_key);
                        result
                    }
                    .boxed()
                    .shared();
                    scans.insert(key, scan.clone());
                    scan
                }
            }
        };

        scan.await.map_err(Error::Shared)
    }

    async fn run_scan(&self, root: &Path) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        tracing::info!(target: "library::scan", root = %root.display(), "Scan started");

        let mut ctx = ScanContext::new(root, self.case_policy);
        if let Err(e) = ctx.load_existing_albums(&self.pool).await {
            tracing::warn!(target: "library::scan", error = %e, "Could not load existing albums");
        }

        let walk = scanner::walk_async(root.to_path_buf(), self.case_policy).await?;
        ctx.set_known_files(walk.known_files);

        let global = catalog::process_global(&self.pool, &mut ctx, &walk.config_files).await;
        let releases = catalog::process_releases(&self.pool, &mut ctx, &walk.config_files).await;
        report.configs = ConfigSummary {
            processed: global.processed + releases.processed,
            failed: global.failed + releases.failed,
        };

        for path in &walk.audio_files {
            match self.pair_file(&mut ctx, path).await {
                Ok(_) => report.successful += 1,
                Err(e) => {
                    tracing::warn!(
                        target: "library::scan",
                        path = %path.display(),
                        error = %e,
                        "Failed to process file"
                    );
                    report.failed += 1;
                    report.failures.push(FileFailure {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        match dedup::deduplicate(&self.pool).await {
            Ok(r) => report.dedup = r,
            Err(e) => tracing::warn!(target: "library::scan", error = %e, "Deduplication failed"),
        }
        match self.clean_stale(&ctx).await {
            Ok(r) => report.cleanup = r,
            Err(e) => tracing::warn!(target: "library::scan", error = %e, "Stale cleanup failed"),
        }
        match cleanup::fix_orphan_albums(&self.pool).await {
            Ok(r) => report.orphans = r,
            Err(e) => tracing::warn!(target: "library::scan", error = %e, "Orphan repair failed"),
        }

        tracing::info!(
            target: "library::scan",
            root = %root.display(),
            successful = report.successful,
            failed = report.failed,
            duplicates = report.dedup.removed,
            stale = report.cleanup.deleted,
            "Scan complete"
        );

        Ok(report)
    }

    /// Queue re-encoding of a track's lossless copy into its mp3.
    pub fn regenerate_mp3(&self, lossless: &Path, target: &Path) -> TaskHandle<()> {
        let converter = Arc::clone(&self.converter);
        let source = lossless.to_path_buf();
        let target = target.to_path_buf();
        self.queue
            .enqueue(format!("convert {}", source.display()), async move {
                converter.convert_to_mp3(&source, &target).await
            })
    }

    /// Queue waveform extraction for a track unless one is already stored or queued.
    pub(crate) fn queue_waveform(&self, track_id: i64, source: &Path) {
        if !self.waveforms_pending.lock().insert(track_id) {
            return;
        }

        let pool = self.pool.clone();
        let generator = Arc::clone(&self.waveform);
        let pending = Arc::clone(&self.waveforms_pending);
        let source = source.to_path_buf();
        self.queue
            .enqueue(format!("waveform {}", source.display()), async move {
                let result = async {
                    let peaks = generator.generate(&source).await?;
                    let json = serde_json::to_string(&peaks)
                        .map_err(|e| Error::waveform(&source, e.to_string()))?;
                    db::set_track_waveform(&pool, track_id, &json)
                        .await
                        .with_context(format!("storing waveform for track {track_id}"))?;
                    Ok::<_, Error>(())
                }
                .await;
                pending.lock().remove(&track_id);
                result
            });
    }
}
