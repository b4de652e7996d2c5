//! Merge tracks that describe the same song.
//!
//! Tracks are grouped by album, artist and normalized title. Within a group
//! the first track (by id) with an mp3 primary survives, else the first
//! track. A lossless copy held by a removed duplicate moves to the survivor
//! if it has none.

use std::collections::BTreeMap;

use sqlx::SqlitePool;

use crate::db;
use crate::error::Result;
use crate::model::Track;
use crate::scanner::has_extension;

/// What deduplication changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    /// Groups that had more than one track
    pub groups: usize,
    /// Tracks deleted
    pub removed: usize,
}

type GroupKey = (Option<i64>, Option<i64>, String);

fn group_key(track: &Track) -> GroupKey {
    (
        track.album_id,
        track.artist_id,
        track.title.trim().to_lowercase(),
    )
}

fn has_mp3_primary(track: &Track) -> bool {
    track
        .file_path
        .as_deref()
        .is_some_and(|p| has_extension(std::path::Path::new(p), "mp3"))
}

/// Index of the track that survives within a group.
fn primary_index(group: &[Track]) -> usize {
    group.iter().position(has_mp3_primary).unwrap_or(0)
}

/// Collapse duplicate local tracks.
///
/// External tracks (stream URLs without local files) are left alone.
pub async fn deduplicate(pool: &SqlitePool) -> Result<DedupReport> {
    let mut groups: BTreeMap<GroupKey, Vec<Track>> = BTreeMap::new();
    for track in db::get_tracks(pool, None).await? {
        if track.file_path.is_none() && track.lossless_path.is_none() {
            continue;
        }
        groups.entry(group_key(&track)).or_default().push(track);
    }

    let mut report = DedupReport::default();
    for group in groups.into_values().filter(|g| g.len() > 1) {
        report.groups += 1;
        let keep = primary_index(&group);
        let primary = &group[keep];
        let mut lossless = primary.lossless_path.clone();

        for (index, duplicate) in group.iter().enumerate() {
            if index == keep {
                continue;
            }
            // Delete first: file_path is unique and the survivor may take over a path
            db::delete_track(pool, duplicate.id).await?;
            report.removed += 1;

            if lossless.is_none()
                && let Some(path) = &duplicate.lossless_path
            {
                db::update_track_paths(
                    pool,
                    primary.id,
                    primary.file_path.as_deref(),
                    Some(path),
                )
                .await?;
                lossless = Some(path.clone());
            }

            tracing::info!(
                target: "library::dedup",
                kept = primary.id,
                removed = duplicate.id,
                title = %primary.title,
                "Removed duplicate track"
            );
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTrack;
    use crate::test_utils::temp_db;

    async fn insert(pool: &SqlitePool, title: &str, file: Option<&str>, lossless: Option<&str>) -> i64 {
        db::insert_track(
            pool,
            &NewTrack {
                title: title.to_string(),
                file_path: file.map(String::from),
                lossless_path: lossless.map(String::from),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_mp3_primary_survives_and_takes_lossless() {
        let (pool, _dir) = temp_db().await;
        let ogg = insert(&pool, "Song", Some("/m/song.ogg"), Some("/m/song.flac")).await;
        let mp3 = insert(&pool, " song ", Some("/m/song.mp3"), None).await;

        let report = deduplicate(&pool).await.unwrap();
        assert_eq!(report, DedupReport { groups: 1, removed: 1 });

        assert!(db::get_track_by_id(&pool, ogg).await.unwrap().is_none());
        let kept = db::get_track_by_id(&pool, mp3).await.unwrap().unwrap();
        assert_eq!(kept.file_path.as_deref(), Some("/m/song.mp3"));
        assert_eq!(kept.lossless_path.as_deref(), Some("/m/song.flac"));
    }

    #[tokio::test]
    async fn test_first_track_wins_without_mp3() {
        let (pool, _dir) = temp_db().await;
        let first = insert(&pool, "Song", Some("/m/a.ogg"), None).await;
        insert(&pool, "Song", Some("/m/b.ogg"), None).await;
        insert(&pool, "Song", Some("/m/c.opus"), None).await;

        let report = deduplicate(&pool).await.unwrap();
        assert_eq!(report.removed, 2);

        let tracks = db::get_tracks(&pool, None).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, first);
    }

    #[tokio::test]
    async fn test_different_albums_are_not_duplicates() {
        let (pool, _dir) = temp_db().await;
        insert(&pool, "Intro", Some("/m/a/intro.mp3"), None).await;
        let album_id = db::create_album(
            &pool,
            &crate::model::AlbumFields {
                title: "B".to_string(),
                slug: "b".to_string(),
                ..Default::default()
            },
            true,
            "public",
        )
        .await
        .unwrap();
        let other = db::insert_track(
            &pool,
            &NewTrack {
                title: "Intro".to_string(),
                album_id: Some(album_id),
                file_path: Some("/m/b/intro.mp3".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let report = deduplicate(&pool).await.unwrap();
        assert_eq!(report, DedupReport::default());
        assert!(db::get_track_by_id(&pool, other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_external_tracks_are_ignored() {
        let (pool, _dir) = temp_db().await;
        insert(&pool, "Live", Some("/m/live.mp3"), None).await;
        db::insert_track(
            &pool,
            &NewTrack {
                title: "Live".to_string(),
                url: Some("https://stream.example/live".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let report = deduplicate(&pool).await.unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(db::get_tracks(&pool, None).await.unwrap().len(), 2);
    }
}
