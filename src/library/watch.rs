//! Incremental updates from filesystem watch events.
//!
//! A rename arrives as a removal plus an addition and is handled as two
//! unrelated events.

use std::path::{Path, PathBuf};

use crate::catalog::{SidecarKind, processor};
use crate::db;
use crate::error::Result;
use crate::scanner::{
    CONFIG_EXTENSIONS, WatchBackend, WatchEvent, is_audio_file, is_config_file, path_string,
};

use super::{Library, PairOutcome, ScanContext};

/// Result of handling one watch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Paired(PairOutcome),
    ConfigApplied(PathBuf),
    Deleted(i64),
    LosslessCleared(i64),
    Regenerating(i64),
    Ignored,
}

impl Library {
    /// Apply one watch event under `root`.
    pub async fn handle_event(&self, root: &Path, event: WatchEvent) -> Result<WatchOutcome> {
        let root = &canonical_path(root).await;
        let event = match event {
            WatchEvent::Added(path) => WatchEvent::Added(canonical_path(&path).await),
            WatchEvent::Removed(path) => WatchEvent::Removed(canonical_path(&path).await),
            other => other,
        };
        match event {
            WatchEvent::Added(path) if is_audio_file(&path) => {
                let mut ctx = self.incremental_context(root, &path).await?;
                let outcome = self.pair_file(&mut ctx, &path).await?;
                Ok(WatchOutcome::Paired(outcome))
            }
            WatchEvent::Added(path) if is_config_file(&path) => self.config_added(root, path).await,
            WatchEvent::Removed(path) if is_audio_file(&path) => self.file_removed(&path).await,
            WatchEvent::Error(message) => {
                tracing::warn!(target: "library::watch", error = %message, "Watcher error");
                Ok(WatchOutcome::Ignored)
            }
            _ => Ok(WatchOutcome::Ignored),
        }
    }

    /// Watch `root` and apply events until the backend stops.
    ///
    /// Per-event failures are logged and do not stop the loop.
    pub async fn watch(&self, root: &Path, backend: &dyn WatchBackend) -> Result<()> {
        let root = &canonical_path(root).await;
        let (_guard, mut events) = backend.watch(root)?;
        tracing::info!(target: "library::watch", root = %root.display(), "Watching for changes");

        while let Some(event) = events.recv().await {
            tracing::debug!(target: "library::watch", ?event, "Event");
            if let Err(e) = self.handle_event(root, event).await {
                tracing::warn!(target: "library::watch", error = %e, "Failed to apply event");
            }
        }

        tracing::info!(target: "library::watch", root = %root.display(), "Watcher stopped");
        Ok(())
    }

    /// Context for a single file: existing albums plus the sidecars in the
    /// folders between the root and the file.
    async fn incremental_context(&self, root: &Path, path: &Path) -> Result<ScanContext> {
        let mut ctx = ScanContext::new(root, self.case_policy);
        ctx.load_existing_albums(&self.pool).await?;

        let sidecars = path
            .parent()
            .map(|dir| ancestor_sidecars(root, dir))
            .unwrap_or_default();
        processor::process_global(&self.pool, &mut ctx, &sidecars).await;
        processor::process_releases(&self.pool, &mut ctx, &sidecars).await;
        Ok(ctx)
    }

    async fn config_added(&self, root: &Path, path: PathBuf) -> Result<WatchOutcome> {
        let Some(kind) = SidecarKind::of(&path) else {
            return Ok(WatchOutcome::Ignored);
        };

        let mut ctx = ScanContext::new(root, self.case_policy);
        ctx.load_existing_albums(&self.pool).await?;

        match kind {
            SidecarKind::Catalog => processor::apply_catalog(&self.pool, &path).await?,
            SidecarKind::Artist => {
                processor::apply_artist(&self.pool, &mut ctx, &path).await?;
            }
            SidecarKind::Release => {
                // Artist folders above the release decide its artist
                let parents = path
                    .parent()
                    .map(|dir| ancestor_sidecars(root, dir))
                    .unwrap_or_default();
                processor::process_global(&self.pool, &mut ctx, &parents).await;
                processor::claim_release_slugs(&mut ctx, &parents).await;
                processor::apply_release(&self.pool, &mut ctx, &path).await?;
            }
        }

        tracing::info!(target: "library::watch", path = %path.display(), "Applied sidecar");
        Ok(WatchOutcome::ConfigApplied(path))
    }

    async fn file_removed(&self, path: &Path) -> Result<WatchOutcome> {
        let path_str = path_string(path);
        let Some(track) = db::get_track_by_path(&self.pool, &path_str).await? else {
            return Ok(WatchOutcome::Ignored);
        };

        let on_disk = |p: &Option<String>| p.as_deref().is_some_and(|p| Path::new(p).is_file());

        if track.file_path.as_deref() == Some(path_str.as_str()) {
            if let Some(lossless) = track.lossless_path.as_deref()
                && Path::new(lossless).is_file()
            {
                tracing::info!(
                    target: "library::watch",
                    track_id = track.id,
                    "Primary removed, regenerating from lossless copy"
                );
                let _ = self.regenerate_mp3(Path::new(lossless), path);
                return Ok(WatchOutcome::Regenerating(track.id));
            }
        } else if on_disk(&track.file_path) {
            tracing::info!(target: "library::watch", track_id = track.id, "Lossless copy removed");
            db::clear_lossless_path(&self.pool, track.id).await?;
            return Ok(WatchOutcome::LosslessCleared(track.id));
        }

        tracing::info!(
            target: "library::watch",
            track_id = track.id,
            path = %path.display(),
            "Removing track"
        );
        db::delete_track(&self.pool, track.id).await?;
        Ok(WatchOutcome::Deleted(track.id))
    }
}

/// Absolute, symlink-free spelling of `path`, matching what a scan stores.
///
/// A path that no longer exists resolves through its parent folder.
async fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = tokio::fs::canonicalize(path).await {
        return resolved;
    }
    if let (Some(dir), Some(name)) = (path.parent(), path.file_name())
        && let Ok(dir) = tokio::fs::canonicalize(dir).await
    {
        return dir.join(name);
    }
    path.to_path_buf()
}

/// Sidecar files in every folder from `root` down to `dir`, outermost first.
fn ancestor_sidecars(root: &Path, dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<&Path> = dir
        .ancestors()
        .take_while(|d| d.starts_with(root))
        .collect();
    dirs.reverse();

    let mut found = Vec::new();
    for dir in dirs {
        for stem in ["catalog", "artist", "release"] {
            for ext in CONFIG_EXTENSIONS {
                let candidate = dir.join(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    found.push(candidate);
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_ancestor_sidecars_outermost_first() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let release = root.join("band/demo");
        fs::create_dir_all(release.join("tracks")).unwrap();
        fs::write(root.join("band/artist.yaml"), "name: Band\n").unwrap();
        fs::write(release.join("release.yml"), "title: Demo\n").unwrap();
        fs::write(root.join("notes.yaml"), "x: 1\n").unwrap();

        let found = ancestor_sidecars(root, &release.join("tracks"));
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("band/artist.yaml"));
        assert!(found[1].ends_with("band/demo/release.yml"));
    }

    #[test]
    fn test_ancestor_sidecars_stop_at_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("artist.yaml"), "name: Outside\n").unwrap();
        let root = dir.path().join("library");
        fs::create_dir_all(&root).unwrap();

        assert!(ancestor_sidecars(&root, &root).is_empty());
    }
}
