//! File system watching for incremental library updates.
//!
//! A [`WatchBackend`] turns a library root into a stream of [`WatchEvent`]s.
//! Only audio files and sidecar configs are reported, and only once settled:
//! partially written files are held back until they stop changing for the
//! stability window.
//!
//! # Backends
//!
//! - [`NotifyBackend`]: native recursive watching through `notify`, with
//!   `notify-debouncer-full` providing the stability window
//! - [`PollingBackend`]: periodic walk for filesystems where native recursive
//!   watching is unavailable (network mounts, some containers)
//!
//! # Usage
//!
//! ```rust,ignore
//! let (guard, mut rx) = NotifyBackend::default().watch(Path::new("/music"))?;
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         WatchEvent::Added(path) => println!("New file: {:?}", path),
//!         WatchEvent::Removed(path) => println!("Deleted: {:?}", path),
//!         WatchEvent::Error(e) => eprintln!("{e}"),
//!     }
//! }
//!
//! // To stop watching:
//! drop(guard);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use walkdir::WalkDir;

use super::{is_audio_file, is_config_file};
use crate::error::{Error, Result};

/// Default stability window before a file is considered settled.
pub const DEFAULT_STABILITY: Duration = Duration::from_millis(500);

/// Events emitted by a watch backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An audio file or sidecar config appeared (or finished changing)
    Added(PathBuf),
    /// An audio file or sidecar config disappeared
    Removed(PathBuf),
    /// The backend hit an error; watching continues
    Error(String),
}

/// Something that can watch a library root.
pub trait WatchBackend: Send + Sync {
    /// Start watching `root` recursively.
    ///
    /// Events stop when the returned guard is dropped.
    fn watch(&self, root: &Path) -> Result<(WatchGuard, UnboundedReceiver<WatchEvent>)>;
}

/// Handle to a running watch. Dropping it stops the watch.
pub struct WatchGuard {
    inner: GuardInner,
}

enum GuardInner {
    Notify {
        _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
        running: Arc<AtomicBool>,
    },
    Polling(tokio::task::JoinHandle<()>),
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        match &self.inner {
            GuardInner::Notify { running, .. } => running.store(false, Ordering::Relaxed),
            GuardInner::Polling(handle) => handle.abort(),
        }
        tracing::debug!(target: "scanner::watcher", "File watcher stopped");
    }
}

// ============================================================================
// Native backend
// ============================================================================

/// Native watcher with a debounce window.
#[derive(Debug, Clone)]
pub struct NotifyBackend {
    pub stability: Duration,
}

impl Default for NotifyBackend {
    fn default() -> Self {
        Self {
            stability: DEFAULT_STABILITY,
        }
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&self, root: &Path) -> Result<(WatchGuard, UnboundedReceiver<WatchEvent>)> {
        let (tx, rx) = unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let mut debouncer = new_debouncer(
            self.stability,
            None, // No tick rate limit
            move |result: DebounceEventResult| {
                if !running_clone.load(Ordering::Relaxed) {
                    return;
                }
                handle_debounced_events(result, &tx);
            },
        )
        .map_err(|e| Error::Watch(format!("Failed to initialize watcher: {e}")))?;

        tracing::info!(target: "scanner::watcher", path = %root.display(), "Watching directory");
        debouncer
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(format!("Failed to watch {}: {e}", root.display())))?;

        let guard = WatchGuard {
            inner: GuardInner::Notify {
                _debouncer: debouncer,
                running,
            },
        };
        Ok((guard, rx))
    }
}

/// Handle debounced events from notify.
fn handle_debounced_events(result: DebounceEventResult, tx: &UnboundedSender<WatchEvent>) {
    match result {
        Ok(events) => {
            for event in events {
                for watch_event in classify(&event.kind, &event.paths, |p| p.is_file()) {
                    tracing::debug!(target: "scanner::watcher", event = ?watch_event, "File event");
                    let _ = tx.send(watch_event);
                }
            }
        }
        Err(errors) => {
            for error in errors {
                tracing::warn!(target: "scanner::watcher", error = %error, "Watch error");
                let _ = tx.send(WatchEvent::Error(error.to_string()));
            }
        }
    }
}

/// Files the library cares about.
fn tracked(path: &Path) -> bool {
    is_audio_file(path) || is_config_file(path)
}

/// Map a raw notify event onto added/removed library files.
///
/// `exists` is injected so the mapping can be tested without a filesystem.
fn classify(kind: &EventKind, paths: &[PathBuf], exists: impl Fn(&Path) -> bool) -> Vec<WatchEvent> {
    let added =
        |p: &PathBuf| (tracked(p) && exists(p.as_path())).then(|| WatchEvent::Added(p.clone()));
    let removed = |p: &PathBuf| tracked(p).then(|| WatchEvent::Removed(p.clone()));

    match kind {
        EventKind::Create(_) => paths.iter().filter_map(added).collect(),
        EventKind::Remove(_) => paths.iter().filter_map(removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().filter_map(removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().filter_map(added).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            removed(&paths[0]).into_iter().chain(added(&paths[1])).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .filter_map(|p| if exists(p.as_path()) { added(p) } else { removed(p) })
            .collect(),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            paths.iter().filter_map(added).collect()
        }
        _ => Vec::new(),
    }
}

// ============================================================================
// Polling backend
// ============================================================================

/// Size and modification time; a file is settled once this stops changing.
type Signature = (u64, Option<SystemTime>);

/// Periodic-walk watcher.
///
/// A new or changed file is reported once its size and mtime were identical
/// on two consecutive polls, so the poll interval doubles as the stability
/// window.
#[derive(Debug, Clone)]
pub struct PollingBackend {
    pub interval: Duration,
}

impl Default for PollingBackend {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

impl WatchBackend for PollingBackend {
    fn watch(&self, root: &Path) -> Result<(WatchGuard, UnboundedReceiver<WatchEvent>)> {
        if !root.is_dir() {
            return Err(Error::Watch(format!("Not a directory: {}", root.display())));
        }

        let (tx, rx) = unbounded_channel();
        let root = root.to_path_buf();
        let interval = self.interval;

        tracing::info!(target: "scanner::watcher", path = %root.display(), "Polling directory");
        // Files present before the watch starts are not reported
        let mut state = PollState {
            settled: snapshot(&root),
            pending: HashMap::new(),
        };
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let current = snapshot_async(root.clone()).await;
                for event in state.advance(current) {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        Ok((
            WatchGuard {
                inner: GuardInner::Polling(handle),
            },
            rx,
        ))
    }
}

#[derive(Debug, Default)]
struct PollState {
    /// Files already reported (or present at startup)
    settled: HashMap<PathBuf, Signature>,
    /// Files seen changing, waiting for a second identical poll
    pending: HashMap<PathBuf, Signature>,
}

impl PollState {
    /// Compare a fresh snapshot with the previous state.
    ///
    /// Removals come first, then additions, each sorted by path.
    fn advance(&mut self, current: HashMap<PathBuf, Signature>) -> Vec<WatchEvent> {
        let mut gone: Vec<PathBuf> = self
            .settled
            .keys()
            .filter(|p| !current.contains_key(*p))
            .cloned()
            .collect();
        gone.sort();
        for path in &gone {
            self.settled.remove(path);
        }
        self.pending.retain(|p, _| current.contains_key(p));

        let mut added = Vec::new();
        for (path, sig) in current {
            if self.settled.get(&path) == Some(&sig) {
                continue;
            }
            if self.pending.get(&path) == Some(&sig) {
                self.pending.remove(&path);
                self.settled.insert(path.clone(), sig);
                added.push(path);
            } else {
                self.settled.remove(&path);
                self.pending.insert(path, sig);
            }
        }
        added.sort();

        gone.into_iter()
            .map(WatchEvent::Removed)
            .chain(added.into_iter().map(WatchEvent::Added))
            .collect()
    }
}

fn snapshot(root: &Path) -> HashMap<PathBuf, Signature> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && tracked(e.path()))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            Some((e.path().to_path_buf(), (meta.len(), meta.modified().ok())))
        })
        .collect()
}

async fn snapshot_async(root: PathBuf) -> HashMap<PathBuf, Signature> {
    tokio::task::spawn_blocking(move || snapshot(&root))
        .await
        .unwrap_or_default()
}
