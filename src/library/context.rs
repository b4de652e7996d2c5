//! Per-scan state: folder caches and the set of files seen on disk.
//!
//! A fresh [`ScanContext`] is built for every full scan and thrown away
//! afterwards. Incremental watcher events use a context built from the
//! database alone (no walk).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use crate::db;
use crate::error::Result;
use crate::scanner::FilesystemCasePolicy;

/// Subfolders of a release directory that hold its audio.
pub const RELEASE_AUDIO_SUBDIRS: &[&str] = &["tracks", "audio"];

/// An album registered for a folder, with the artist its tracks inherit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlbumRef {
    pub id: i64,
    pub artist_id: Option<i64>,
}

/// Folder caches and known files for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ScanContext {
    root: PathBuf,
    case_policy: FilesystemCasePolicy,
    /// Release folders (and their audio subfolders) from release.yaml
    folder_albums: HashMap<String, AlbumRef>,
    /// Artist folders from artist.yaml
    folder_artists: HashMap<String, i64>,
    /// Per folder: how many existing tracks belong to each album
    existing_votes: HashMap<String, BTreeMap<i64, usize>>,
    /// Normalized relative paths of every file found by the walk
    known_files: HashSet<String>,
    /// Slugs some release.yaml in this pass resolves to
    claimed_slugs: HashSet<String>,
}

impl ScanContext {
    pub fn new(root: impl Into<PathBuf>, case_policy: FilesystemCasePolicy) -> Self {
        Self {
            root: root.into(),
            case_policy,
            folder_albums: HashMap::new(),
            folder_artists: HashMap::new(),
            existing_votes: HashMap::new(),
            known_files: HashSet::new(),
            claimed_slugs: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn case_policy(&self) -> FilesystemCasePolicy {
        self.case_policy
    }

    /// Build the folder to existing-album majority map from stored tracks.
    ///
    /// Every local path of a track with an album votes for that album in the
    /// path's folder.
    pub async fn load_existing_albums(&mut self, pool: &SqlitePool) -> Result<()> {
        self.existing_votes.clear();
        for track in db::get_tracks(pool, None).await? {
            let Some(album_id) = track.album_id else {
                continue;
            };
            for path in [&track.file_path, &track.lossless_path].into_iter().flatten() {
                if let Some(dir) = Path::new(path).parent() {
                    *self
                        .existing_votes
                        .entry(self.case_policy.dir_key(dir))
                        .or_default()
                        .entry(album_id)
                        .or_default() += 1;
                }
            }
        }
        tracing::debug!(
            target: "library::context",
            folders = self.existing_votes.len(),
            "Built folder to album map"
        );
        Ok(())
    }

    /// Record files found by the walk.
    pub fn set_known_files(&mut self, known_files: HashSet<String>) {
        self.known_files = known_files;
    }

    /// Whether the walk saw `path`. Paths outside the root are never known.
    pub fn is_known(&self, path: &Path) -> bool {
        self.case_policy
            .relative_key(&self.root, path)
            .is_some_and(|key| self.known_files.contains(&key))
    }

    /// Add a file produced during the scan (e.g. a fresh conversion).
    pub fn mark_known(&mut self, path: &Path) {
        if let Some(key) = self.case_policy.relative_key(&self.root, path) {
            self.known_files.insert(key);
        }
    }

    /// Mark `slug` as owned by a release.yaml seen in this pass.
    pub fn claim_slug(&mut self, slug: impl Into<String>) {
        self.claimed_slugs.insert(slug.into());
    }

    pub fn is_slug_claimed(&self, slug: &str) -> bool {
        self.claimed_slugs.contains(slug)
    }

    pub fn register_artist_folder(&mut self, dir: &Path, artist_id: i64) {
        self.folder_artists
            .insert(self.case_policy.dir_key(dir), artist_id);
    }

    /// Register a release folder and its audio subfolders.
    pub fn register_album_folder(&mut self, dir: &Path, album: AlbumRef) {
        self.folder_albums
            .insert(self.case_policy.dir_key(dir), album);
        for sub in RELEASE_AUDIO_SUBDIRS {
            self.folder_albums
                .insert(self.case_policy.dir_key(&dir.join(sub)), album);
        }
    }

    /// Artist of the nearest folder at or above `dir` that has an artist.yaml.
    pub fn artist_for_dir(&self, dir: &Path) -> Option<i64> {
        dir.ancestors()
            .find_map(|d| self.folder_artists.get(&self.case_policy.dir_key(d)))
            .copied()
    }

    /// Album for an audio file: the nearest release folder above it, else the
    /// album most existing tracks in the same folder belong to.
    pub fn album_for_file(&self, path: &Path) -> Option<AlbumRef> {
        let dir = path.parent()?;
        dir.ancestors()
            .find_map(|d| self.folder_albums.get(&self.case_policy.dir_key(d)))
            .copied()
            .or_else(|| {
                self.majority(&[dir.to_path_buf()]).map(|id| AlbumRef {
                    id,
                    artist_id: None,
                })
            })
    }

    /// Existing album a release folder most likely describes, by majority
    /// vote over the folder and its audio subfolders. Ties go to the oldest.
    pub fn existing_album_for_release(&self, release_dir: &Path) -> Option<i64> {
        let mut dirs = vec![release_dir.to_path_buf()];
        dirs.extend(RELEASE_AUDIO_SUBDIRS.iter().map(|s| release_dir.join(s)));
        self.majority(&dirs)
    }

    fn majority(&self, dirs: &[PathBuf]) -> Option<i64> {
        let mut totals: BTreeMap<i64, usize> = BTreeMap::new();
        for dir in dirs {
            if let Some(votes) = self.existing_votes.get(&self.case_policy.dir_key(dir)) {
                for (album_id, count) in votes {
                    *totals.entry(*album_id).or_default() += count;
                }
            }
        }
        // Ascending ids; strict comparison keeps the oldest on ties
        totals
            .into_iter()
            .fold(None, |best: Option<(i64, usize)>, (id, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((id, count)),
            })
            .map(|(id, _)| id)
    }
}
