//! Directory walking and file watching.
//!
//! [`walk`] enumerates a library root once and classifies every file;
//! [`watcher`] reports incremental changes afterwards.

mod paths;
pub mod watcher;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

pub use paths::{
    AUDIO_EXTENSIONS, CONFIG_EXTENSIONS, FilesystemCasePolicy, LOSSLESS_EXTENSIONS,
    has_extension, is_audio_file, is_config_file, is_lossless_file, mp3_sibling, path_string,
    sibling_candidates,
};
pub use watcher::{NotifyBackend, PollingBackend, WatchBackend, WatchEvent, WatchGuard};

/// Everything found under a library root.
#[derive(Debug, Default, Clone)]
pub struct WalkResult {
    /// Audio files in walk order (sorted by file name per directory)
    pub audio_files: Vec<PathBuf>,
    /// YAML sidecars in walk order
    pub config_files: Vec<PathBuf>,
    /// Every file, as normalized keys relative to the root
    pub known_files: HashSet<String>,
}

/// Recursively walk `root` and classify what is found.
///
/// Any I/O error during the walk aborts it; a partial listing would make the
/// stale-record cleaner delete rows for files it simply did not see.
pub fn walk(root: &Path, case_policy: FilesystemCasePolicy) -> Result<WalkResult> {
    let mut result = WalkResult::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Walk {
            root: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(key) = case_policy.relative_key(root, path) {
            result.known_files.insert(key);
        }

        if is_audio_file(path) {
            result.audio_files.push(path.to_path_buf());
        } else if is_config_file(path) {
            result.config_files.push(path.to_path_buf());
        }
    }

    tracing::debug!(
        target: "scanner::walk",
        root = %root.display(),
        audio = result.audio_files.len(),
        configs = result.config_files.len(),
        files = result.known_files.len(),
        "Walk complete"
    );

    Ok(result)
}

/// Walk on a blocking thread so the async runtime is not stalled.
pub async fn walk_async(root: PathBuf, case_policy: FilesystemCasePolicy) -> Result<WalkResult> {
    let root_for_err = root.clone();
    tokio::task::spawn_blocking(move || walk(&root, case_policy))
        .await
        .map_err(|e| Error::Walk {
            root: root_for_err,
            message: e.to_string(),
        })?
}
