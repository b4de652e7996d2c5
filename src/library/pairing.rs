//! Track resolution: match an audio file to an existing track or create one.
//!
//! Resolution order for a file:
//!
//! 1. exact path match on `file_path` or `lossless_path`
//! 2. sibling match: same folder and stem, another audio extension
//! 3. tag match on (title, artist, album)
//!
//! A lossless file (wav/flac) never becomes the primary `file_path` of a new
//! track: the primary is its `.mp3` sibling and the lossless file is kept as
//! `lossless_path`. Wav sources are converted right away; flac sources get
//! their mp3 from the stale-record cleaner if it is still missing.

use std::path::{Path, PathBuf};

use crate::db;
use crate::error::{Error, Result};
use crate::metadata::TrackMetadata;
use crate::model::{NewTrack, Track};
use crate::scanner::{has_extension, is_lossless_file, mp3_sibling, path_string, sibling_candidates};

use super::{AlbumRef, Library, ScanContext};

/// What pairing did to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairAction {
    Created,
    Updated,
    Unchanged,
}

/// Result of pairing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairOutcome {
    pub track_id: i64,
    pub action: PairAction,
}

/// Path slots a matched track should end up with.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathUpdate {
    file_path: Option<String>,
    lossless_path: Option<String>,
}

impl Library {
    /// Reconcile one audio file with the database.
    pub async fn pair_file(&self, ctx: &mut ScanContext, path: &Path) -> Result<PairOutcome> {
        let path_str = path_string(path);

        if let Some(track) = db::get_track_by_path(&self.pool, &path_str).await? {
            return self.update_existing(ctx, track, path).await;
        }

        for candidate in sibling_candidates(path) {
            if let Some(track) = db::get_track_by_path(&self.pool, &path_string(&candidate)).await? {
                tracing::debug!(
                    target: "library::pairing",
                    path = %path.display(),
                    sibling = %candidate.display(),
                    track_id = track.id,
                    "Matched sibling"
                );
                return self.update_existing(ctx, track, path).await;
            }
        }

        let meta = self.extractor.extract(path).await?;
        let title = meta.title_or_stem(path);
        let album = ctx.album_for_file(path);
        let artist_id = self.resolve_artist(ctx, path, album, &meta).await?;

        if let Some(track) =
            db::get_track_by_identity(&self.pool, &title, artist_id, album.map(|a| a.id)).await?
        {
            tracing::debug!(
                target: "library::pairing",
                path = %path.display(),
                track_id = track.id,
                "Matched by tags"
            );
            return self.update_existing(ctx, track, path).await;
        }

        self.create_track(ctx, path, title, album, artist_id, meta)
            .await
    }

    /// Album artist, else the nearest artist folder, else the tag artist.
    async fn resolve_artist(
        &self,
        ctx: &ScanContext,
        path: &Path,
        album: Option<AlbumRef>,
        meta: &TrackMetadata,
    ) -> Result<Option<i64>> {
        if let Some(id) = album.and_then(|a| a.artist_id) {
            return Ok(Some(id));
        }
        if let Some(id) = path.parent().and_then(|dir| ctx.artist_for_dir(dir)) {
            return Ok(Some(id));
        }
        match meta.known_artist() {
            Some(name) => Ok(Some(db::get_or_create_artist(&self.pool, name).await?)),
            None => Ok(None),
        }
    }

    async fn update_existing(
        &self,
        ctx: &ScanContext,
        track: Track,
        path: &Path,
    ) -> Result<PairOutcome> {
        let mut changed = false;

        let update = resolve_paths(&track, path, |p| Path::new(p).is_file());
        if update.file_path != track.file_path || update.lossless_path != track.lossless_path {
            tracing::info!(
                target: "library::pairing",
                track_id = track.id,
                file_path = ?update.file_path,
                lossless_path = ?update.lossless_path,
                "Updating track paths"
            );
            db::update_track_paths(
                &self.pool,
                track.id,
                update.file_path.as_deref(),
                update.lossless_path.as_deref(),
            )
            .await?;
            changed = true;
        }

        if let Some(album) = ctx.album_for_file(path)
            && track.album_id != Some(album.id)
        {
            let artist_id = track.artist_id.or(album.artist_id);
            db::update_track_links(&self.pool, track.id, Some(album.id), artist_id).await?;
            changed = true;
        }

        let source = [&update.file_path, &update.lossless_path]
            .into_iter()
            .flatten()
            .map(PathBuf::from)
            .find(|p| p.is_file());

        if track.duration.is_none()
            && let Some(source) = &source
            && let Some(duration) = self.probe_duration(source).await
        {
            db::set_track_duration(&self.pool, track.id, duration).await?;
            changed = true;
        }

        if track.waveform.is_none()
            && let Some(source) = &source
        {
            self.queue_waveform(track.id, source);
        }

        Ok(PairOutcome {
            track_id: track.id,
            action: if changed {
                PairAction::Updated
            } else {
                PairAction::Unchanged
            },
        })
    }

    async fn create_track(
        &self,
        ctx: &mut ScanContext,
        path: &Path,
        title: String,
        album: Option<AlbumRef>,
        artist_id: Option<i64>,
        meta: TrackMetadata,
    ) -> Result<PairOutcome> {
        let lossless = is_lossless_file(path);
        let primary = if lossless { mp3_sibling(path) } else { path.to_path_buf() };

        if lossless && has_extension(path, "wav") && !primary.exists() {
            match self.regenerate_mp3(path, &primary).wait().await {
                Ok(()) => ctx.mark_known(&primary),
                Err(e) => tracing::warn!(
                    target: "library::pairing",
                    path = %path.display(),
                    error = %e,
                    "Conversion to mp3 failed, keeping track"
                ),
            }
        }

        let duration = match meta.duration {
            Some(d) => Some(d),
            None => self.probe_duration(path).await,
        };

        let new_track = NewTrack {
            title,
            album_id: album.map(|a| a.id),
            artist_id,
            track_num: meta.track_number.map(i64::from),
            duration,
            file_path: Some(path_string(&primary)),
            lossless_path: lossless.then(|| path_string(path)),
            format: meta.format.clone(),
            bitrate: meta.bitrate.map(i64::from),
            sample_rate: meta.sample_rate.map(i64::from),
            ..Default::default()
        };

        let track_id = match db::insert_track(&self.pool, &new_track).await {
            Ok(id) => id,
            // The watcher and a scan can race on the same new file
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let existing = db::get_track_by_path(&self.pool, &path_string(&primary))
                    .await?
                    .ok_or_else(|| Error::metadata(path, "Track vanished after unique conflict"))?;
                return Ok(PairOutcome {
                    track_id: existing.id,
                    action: PairAction::Unchanged,
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            target: "library::pairing",
            path = %path.display(),
            track_id,
            "Created track"
        );

        let source = if primary.is_file() { primary } else { path.to_path_buf() };
        self.queue_waveform(track_id, &source);

        Ok(PairOutcome {
            track_id,
            action: PairAction::Created,
        })
    }

    /// Duration from ffprobe; a failed probe is logged and treated as unknown.
    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        self.converter.probe_duration(path).await.unwrap_or_else(|e| {
            tracing::debug!(target: "library::pairing", path = %path.display(), error = %e, "Duration probe failed");
            None
        })
    }
}

/// Decide a matched track's path slots after seeing `path`.
///
/// `exists` reports whether a stored path is still on disk.
fn resolve_paths(track: &Track, path: &Path, exists: impl Fn(&str) -> bool) -> PathUpdate {
    let new = path_string(path);
    let current = PathUpdate {
        file_path: track.file_path.clone(),
        lossless_path: track.lossless_path.clone(),
    };

    if track.references(&new) {
        return current;
    }

    if is_lossless_file(path) {
        return match (&track.file_path, &track.lossless_path) {
            // Archival copy already present
            (_, Some(existing)) if exists(existing.as_str()) => current,
            // Primary is itself lossless: move it aside behind an mp3 primary
            (Some(primary), _) if is_lossless_file(Path::new(primary)) => PathUpdate {
                file_path: Some(path_string(&mp3_sibling(path))),
                lossless_path: Some(new),
            },
            (None, _) => PathUpdate {
                file_path: Some(path_string(&mp3_sibling(path))),
                lossless_path: Some(new),
            },
            (Some(_), _) => PathUpdate {
                file_path: current.file_path,
                lossless_path: Some(new),
            },
        };
    }

    // Lossy file from here on
    if track.primary_is_lossless() {
        return PathUpdate {
            file_path: Some(new),
            lossless_path: track.lossless_path.clone().or(track.file_path.clone()),
        };
    }

    let replace = match track.file_path.as_deref() {
        None => true,
        Some(current_path) => {
            !exists(current_path)
                || (has_extension(path, "mp3") && !has_extension(Path::new(current_path), "mp3"))
        }
    };
    if replace {
        PathUpdate {
            file_path: Some(new),
            lossless_path: current.lossless_path,
        }
    } else {
        current
    }
}
