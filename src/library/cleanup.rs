//! Post-scan repair: drop records for files that are gone and give
//! artist-less albums the artist all their tracks agree on.

use std::path::Path;

use sqlx::SqlitePool;

use crate::db;
use crate::error::{Result, ResultExt};
use crate::model::Track;
use crate::scanner::{is_lossless_file, mp3_sibling, path_string};

use super::{Library, ScanContext};

/// What the stale-record cleaner changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Tracks whose files are all gone
    pub deleted: usize,
    /// Tracks whose lossless copy is gone
    pub lossless_cleared: usize,
    /// Tracks whose mp3 is gone but lossless copy remains
    pub regenerations: usize,
}

/// What the orphan fixer changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanReport {
    pub fixed: usize,
    /// Albums with no track artist, or more than one
    pub unresolved: usize,
}

/// Decision for one track after a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stale {
    Keep,
    Delete,
    ClearLossless,
    /// Primary missing; re-encode from lossless into this path
    Regenerate { target: String },
}

fn classify(track: &Track, known: impl Fn(&str) -> bool) -> Stale {
    let primary = track.file_path.as_deref().map(|p| (p, known(p)));
    let lossless = track.lossless_path.as_deref().map(|p| (p, known(p)));

    match (primary, lossless) {
        (None, None) => Stale::Keep,
        (Some((_, true)), Some((_, false))) => Stale::ClearLossless,
        (Some((_, true)), _) => Stale::Keep,
        (Some((p, false)), Some((l, true))) => Stale::Regenerate {
            target: if is_lossless_file(Path::new(p)) {
                path_string(&mp3_sibling(Path::new(l)))
            } else {
                p.to_string()
            },
        },
        (None, Some((l, true))) => Stale::Regenerate {
            target: path_string(&mp3_sibling(Path::new(l))),
        },
        (Some((_, false)), None) | (Some((_, false)), Some((_, false))) | (None, Some((_, false))) => {
            Stale::Delete
        }
    }
}

fn under_root(ctx: &ScanContext, track: &Track) -> bool {
    [&track.file_path, &track.lossless_path]
        .into_iter()
        .flatten()
        .any(|p| Path::new(p).starts_with(ctx.root()))
}

impl Library {
    /// Reconcile stored tracks under the scanned root with the files the walk saw.
    ///
    /// External tracks and tracks outside the root are not touched.
    pub async fn clean_stale(&self, ctx: &ScanContext) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let tracks = db::get_tracks(&self.pool, None)
            .await
            .with_context("loading tracks for cleanup")?;
        for track in tracks {
            if !under_root(ctx, &track) {
                continue;
            }

            match classify(&track, |p| ctx.is_known(Path::new(p))) {
                Stale::Keep => {}
                Stale::Delete => {
                    tracing::info!(
                        target: "library::cleanup",
                        track_id = track.id,
                        file_path = ?track.file_path,
                        "Removing track whose files are gone"
                    );
                    db::delete_track(&self.pool, track.id).await?;
                    report.deleted += 1;
                }
                Stale::ClearLossless => {
                    tracing::info!(
                        target: "library::cleanup",
                        track_id = track.id,
                        lossless_path = ?track.lossless_path,
                        "Lossless copy is gone"
                    );
                    db::clear_lossless_path(&self.pool, track.id).await?;
                    report.lossless_cleared += 1;
                }
                Stale::Regenerate { target } => {
                    let Some(lossless) = track.lossless_path.as_deref() else {
                        continue;
                    };
                    if track.file_path.as_deref() != Some(target.as_str()) {
                        db::update_track_file_path(&self.pool, track.id, &target).await?;
                    }
                    tracing::info!(
                        target: "library::cleanup",
                        track_id = track.id,
                        mp3 = %target,
                        "Primary missing, regenerating from lossless copy"
                    );
                    // Not awaited: the queue reports failures itself
                    let _ = self.regenerate_mp3(Path::new(lossless), Path::new(&target));
                    report.regenerations += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Give each artist-less album the single artist its tracks share.
pub async fn fix_orphan_albums(pool: &SqlitePool) -> Result<OrphanReport> {
    let mut report = OrphanReport::default();

    for album in db::get_orphan_albums(pool).await? {
        let artists = db::get_album_track_artist_ids(pool, album.id).await?;
        match artists.as_slice() {
            [artist_id] => {
                db::set_album_artist(pool, album.id, *artist_id).await?;
                tracing::info!(
                    target: "library::cleanup",
                    album_id = album.id,
                    artist_id,
                    "Assigned artist to orphan album"
                );
                report.fixed += 1;
            }
            _ => {
                tracing::warn!(
                    target: "library::cleanup",
                    album_id = album.id,
                    title = %album.title,
                    candidates = artists.len(),
                    "Cannot pick an artist for album"
                );
                report.unresolved += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlbumFields, NewTrack};
    use crate::test_utils::temp_db;

    fn track(file_path: Option<&str>, lossless_path: Option<&str>) -> Track {
        Track {
            id: 1,
            title: "Song".to_string(),
            album_id: None,
            artist_id: None,
            track_num: None,
            duration: None,
            file_path: file_path.map(String::from),
            lossless_path: lossless_path.map(String::from),
            format: None,
            bitrate: None,
            sample_rate: None,
            waveform: None,
            url: None,
            service: None,
            external_artwork: None,
        }
    }

    #[test]
    fn test_classify() {
        let only = |known: &'static [&'static str]| move |p: &str| known.iter().any(|k| *k == p);

        let t = track(Some("/m/a.mp3"), Some("/m/a.wav"));
        assert_eq!(classify(&t, only(&["/m/a.mp3", "/m/a.wav"])), Stale::Keep);
        assert_eq!(classify(&t, only(&["/m/a.mp3"])), Stale::ClearLossless);
        assert_eq!(
            classify(&t, only(&["/m/a.wav"])),
            Stale::Regenerate {
                target: "/m/a.mp3".to_string()
            }
        );
        assert_eq!(classify(&t, only(&[])), Stale::Delete);

        let t = track(Some("/m/b.ogg"), None);
        assert_eq!(classify(&t, only(&[])), Stale::Delete);

        let external = track(None, None);
        assert_eq!(classify(&external, only(&[])), Stale::Keep);
    }

    async fn album(pool: &SqlitePool, slug: &str) -> i64 {
        db::create_album(
            pool,
            &AlbumFields {
                title: slug.to_string(),
                slug: slug.to_string(),
                ..Default::default()
            },
            true,
            "public",
        )
        .await
        .unwrap()
    }

    async fn track_on(pool: &SqlitePool, album_id: i64, artist_id: Option<i64>, path: &str) {
        db::insert_track(
            pool,
            &NewTrack {
                title: path.to_string(),
                album_id: Some(album_id),
                artist_id,
                file_path: Some(path.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_orphan_with_single_artist_is_fixed() {
        let (pool, _dir) = temp_db().await;
        let artist = db::get_or_create_artist(&pool, "Seven").await.unwrap();
        let album_id = album(&pool, "solo").await;
        track_on(&pool, album_id, Some(artist), "/m/1.mp3").await;
        track_on(&pool, album_id, Some(artist), "/m/2.mp3").await;
        track_on(&pool, album_id, None, "/m/3.mp3").await;

        let report = fix_orphan_albums(&pool).await.unwrap();
        assert_eq!(report, OrphanReport { fixed: 1, unresolved: 0 });
        let album = db::get_album(&pool, album_id).await.unwrap().unwrap();
        assert_eq!(album.artist_id, Some(artist));
    }

    #[tokio::test]
    async fn test_orphan_with_many_artists_stays_null() {
        let (pool, _dir) = temp_db().await;
        let seven = db::get_or_create_artist(&pool, "Seven").await.unwrap();
        let nine = db::get_or_create_artist(&pool, "Nine").await.unwrap();
        let album_id = album(&pool, "split").await;
        track_on(&pool, album_id, Some(seven), "/m/1.mp3").await;
        track_on(&pool, album_id, Some(nine), "/m/2.mp3").await;

        let report = fix_orphan_albums(&pool).await.unwrap();
        assert_eq!(report, OrphanReport { fixed: 0, unresolved: 1 });
        let album = db::get_album(&pool, album_id).await.unwrap().unwrap();
        assert_eq!(album.artist_id, None);
    }

    #[tokio::test]
    async fn test_orphan_without_tracks_stays_null() {
        let (pool, _dir) = temp_db().await;
        let album_id = album(&pool, "empty").await;

        let report = fix_orphan_albums(&pool).await.unwrap();
        assert_eq!(report.unresolved, 1);
        assert!(db::get_album(&pool, album_id).await.unwrap().unwrap().artist_id.is_none());
    }
}
