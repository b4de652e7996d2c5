//! Database module for track, artist, album and settings persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Every function here is a single statement, so each call is atomic on its
//! own; the engine never relies on multi-call transactions.
//!
//! # Example
//!
//! ```ignore
//! use tunesync::db::{init_db, get_tracks};
//!
//! let pool = init_db("sqlite:tunesync.db").await?;
//! let tracks = get_tracks(&pool, None).await?;
//! ```

use crate::model::{Album, AlbumFields, Artist, NewTrack, Track};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "tunesync.db";

const TRACK_COLUMNS: &str = "id, title, album_id, artist_id, track_num, duration, file_path, \
     lossless_path, format, bitrate, sample_rate, waveform, url, service, external_artwork";

const ALBUM_COLUMNS: &str = "id, title, slug, artist_id, cover_path, date, year, description, \
     genres, release_type, download, external_links, is_release, visibility";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Artists
// ============================================================================

/// Look up an artist by exact name.
pub async fn get_artist_by_name(pool: &SqlitePool, name: &str) -> sqlx::Result<Option<Artist>> {
    sqlx::query_as::<_, Artist>(
        "SELECT id, name, bio, avatar_path, links FROM artists WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
}

/// Get an artist by ID.
pub async fn get_artist(pool: &SqlitePool, artist_id: i64) -> sqlx::Result<Option<Artist>> {
    sqlx::query_as::<_, Artist>("SELECT id, name, bio, avatar_path, links FROM artists WHERE id = ?")
        .bind(artist_id)
        .fetch_optional(pool)
        .await
}

/// Get or create an artist by name.
///
/// Idempotent - calling with the same name always returns the same ID.
pub async fn get_or_create_artist(pool: &SqlitePool, name: &str) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO artists (name) VALUES (?)
        ON CONFLICT(name) DO UPDATE SET name = excluded.name
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Fill in artist profile fields.
///
/// Only provided values are written; existing values are never cleared.
pub async fn update_artist_profile(
    pool: &SqlitePool,
    artist_id: i64,
    bio: Option<&str>,
    avatar_path: Option<&str>,
    links: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE artists SET
            bio = COALESCE(?, bio),
            avatar_path = COALESCE(?, avatar_path),
            links = COALESCE(?, links)
        WHERE id = ?
        "#,
    )
    .bind(bio)
    .bind(avatar_path)
    .bind(links)
    .bind(artist_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ============================================================================
// Albums
// ============================================================================

/// Get an album by ID.
pub async fn get_album(pool: &SqlitePool, album_id: i64) -> sqlx::Result<Option<Album>> {
    sqlx::query_as::<_, Album>(&format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE id = ?"))
        .bind(album_id)
        .fetch_optional(pool)
        .await
}

/// Look up an album by slug.
pub async fn get_album_by_slug(pool: &SqlitePool, slug: &str) -> sqlx::Result<Option<Album>> {
    sqlx::query_as::<_, Album>(&format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE slug = ?"))
        .bind(slug)
        .fetch_optional(pool)
        .await
}

/// Get all albums, ordered by ID.
pub async fn get_albums(pool: &SqlitePool) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>(&format!("SELECT {ALBUM_COLUMNS} FROM albums ORDER BY id"))
        .fetch_all(pool)
        .await
}

/// Get albums that have no artist assigned.
pub async fn get_orphan_albums(pool: &SqlitePool) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums WHERE artist_id IS NULL ORDER BY id"
    ))
    .fetch_all(pool)
    .await
}

/// Insert a new album with its publication flags.
pub async fn create_album(
    pool: &SqlitePool,
    fields: &AlbumFields,
    is_release: bool,
    visibility: &str,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO albums (
            title, slug, artist_id, cover_path, date, year, description,
            genres, release_type, download, external_links, is_release, visibility
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.slug)
    .bind(fields.artist_id)
    .bind(&fields.cover_path)
    .bind(&fields.date)
    .bind(fields.year)
    .bind(&fields.description)
    .bind(&fields.genres)
    .bind(&fields.release_type)
    .bind(&fields.download)
    .bind(&fields.external_links)
    .bind(is_release)
    .bind(visibility)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Refresh an existing album from its release.yaml.
///
/// The artist is only set when the album has none. Other provided values
/// replace stored ones; `None` leaves a column untouched. Publication flags
/// (`is_release`, `visibility`) are not part of this statement.
pub async fn update_album_from_config(
    pool: &SqlitePool,
    album_id: i64,
    fields: &AlbumFields,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE albums SET
            title = ?,
            slug = ?,
            artist_id = COALESCE(artist_id, ?),
            cover_path = COALESCE(?, cover_path),
            date = COALESCE(?, date),
            year = COALESCE(?, year),
            description = COALESCE(?, description),
            genres = COALESCE(?, genres),
            release_type = COALESCE(?, release_type),
            download = COALESCE(?, download),
            external_links = COALESCE(?, external_links)
        WHERE id = ?
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.slug)
    .bind(fields.artist_id)
    .bind(&fields.cover_path)
    .bind(&fields.date)
    .bind(fields.year)
    .bind(&fields.description)
    .bind(&fields.genres)
    .bind(&fields.release_type)
    .bind(&fields.download)
    .bind(&fields.external_links)
    .bind(album_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Assign an artist to an album.
pub async fn set_album_artist(pool: &SqlitePool, album_id: i64, artist_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE albums SET artist_id = ? WHERE id = ?")
        .bind(artist_id)
        .bind(album_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Distinct non-null artist IDs across an album's tracks.
pub async fn get_album_track_artist_ids(pool: &SqlitePool, album_id: i64) -> sqlx::Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT artist_id FROM tracks WHERE album_id = ? AND artist_id IS NOT NULL ORDER BY artist_id",
    )
    .bind(album_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ============================================================================
// Tracks
// ============================================================================

/// Get a track by its database ID.
pub async fn get_track_by_id(pool: &SqlitePool, track_id: i64) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?"))
        .bind(track_id)
        .fetch_optional(pool)
        .await
}

/// Find the track whose primary or lossless path is `path`.
pub async fn get_track_by_path(pool: &SqlitePool, path: &str) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE file_path = ? OR lossless_path = ? ORDER BY id LIMIT 1"
    ))
    .bind(path)
    .bind(path)
    .fetch_optional(pool)
    .await
}

/// Find a track by its logical identity: title, artist and album.
///
/// NULL artist or album only match NULL.
pub async fn get_track_by_identity(
    pool: &SqlitePool,
    title: &str,
    artist_id: Option<i64>,
    album_id: Option<i64>,
) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks \
         WHERE title = ? AND artist_id IS ? AND album_id IS ? ORDER BY id LIMIT 1"
    ))
    .bind(title)
    .bind(artist_id)
    .bind(album_id)
    .fetch_optional(pool)
    .await
}

/// Find an external track of an album by stream URL.
pub async fn get_track_by_url(
    pool: &SqlitePool,
    album_id: Option<i64>,
    url: &str,
) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE url = ? AND album_id IS ? ORDER BY id LIMIT 1"
    ))
    .bind(url)
    .bind(album_id)
    .fetch_optional(pool)
    .await
}

/// Get tracks, optionally restricted to one album, ordered by ID.
pub async fn get_tracks(pool: &SqlitePool, album_id: Option<i64>) -> sqlx::Result<Vec<Track>> {
    match album_id {
        Some(id) => {
            sqlx::query_as::<_, Track>(&format!(
                "SELECT {TRACK_COLUMNS} FROM tracks WHERE album_id = ? ORDER BY id"
            ))
            .bind(id)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY id"))
                .fetch_all(pool)
                .await
        }
    }
}

/// Insert a new track and return its ID.
pub async fn insert_track(pool: &SqlitePool, track: &NewTrack) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO tracks (
            title, album_id, artist_id, track_num, duration, file_path, lossless_path,
            format, bitrate, sample_rate, url, service, external_artwork
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&track.title)
    .bind(track.album_id)
    .bind(track.artist_id)
    .bind(track.track_num)
    .bind(track.duration)
    .bind(&track.file_path)
    .bind(&track.lossless_path)
    .bind(&track.format)
    .bind(track.bitrate)
    .bind(track.sample_rate)
    .bind(&track.url)
    .bind(&track.service)
    .bind(&track.external_artwork)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Set both path slots of a track.
pub async fn update_track_paths(
    pool: &SqlitePool,
    track_id: i64,
    file_path: Option<&str>,
    lossless_path: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE tracks SET file_path = ?, lossless_path = ? WHERE id = ?")
        .bind(file_path)
        .bind(lossless_path)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set the primary path of a track, leaving the lossless path alone.
pub async fn update_track_file_path(
    pool: &SqlitePool,
    track_id: i64,
    file_path: &str,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE tracks SET file_path = ? WHERE id = ?")
        .bind(file_path)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Forget a track's lossless copy.
pub async fn clear_lossless_path(pool: &SqlitePool, track_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE tracks SET lossless_path = NULL WHERE id = ?")
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Point a track at an album and artist.
pub async fn update_track_links(
    pool: &SqlitePool,
    track_id: i64,
    album_id: Option<i64>,
    artist_id: Option<i64>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE tracks SET album_id = ?, artist_id = ? WHERE id = ?")
        .bind(album_id)
        .bind(artist_id)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fill in a missing duration.
pub async fn set_track_duration(pool: &SqlitePool, track_id: i64, duration: f64) -> sqlx::Result<()> {
    sqlx::query("UPDATE tracks SET duration = ? WHERE id = ? AND duration IS NULL")
        .bind(duration)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Store a computed waveform (JSON array of peaks).
pub async fn set_track_waveform(pool: &SqlitePool, track_id: i64, waveform: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE tracks SET waveform = ? WHERE id = ?")
        .bind(waveform)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a track by ID.
///
/// Returns whether a row was removed.
pub async fn delete_track(pool: &SqlitePool, track_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Settings
// ============================================================================

/// Set a site setting, replacing any previous value.
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get a site setting.
pub async fn get_setting(pool: &SqlitePool, key: &str) -> sqlx::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_db;

    fn local_track(title: &str, path: &str) -> NewTrack {
        NewTrack {
            title: title.to_string(),
            file_path: Some(path.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db_url = db_url(Some(&db_path));

        let pool = init_db(&db_url).await.expect("Failed to init db");
        assert!(db_path.exists());

        let tracks = get_tracks(&pool, None).await.expect("Failed to query tracks");
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_artist_creation_is_idempotent() {
        let (pool, _dir) = temp_db().await;

        let id1 = get_or_create_artist(&pool, "Test Artist").await.unwrap();
        let id2 = get_or_create_artist(&pool, "Test Artist").await.unwrap();
        let id3 = get_or_create_artist(&pool, "Another Artist").await.unwrap();

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn test_artist_profile_update_is_non_destructive() {
        let (pool, _dir) = temp_db().await;
        let id = get_or_create_artist(&pool, "Band").await.unwrap();

        update_artist_profile(&pool, id, Some("Formed in 1999"), Some("/a.jpg"), None)
            .await
            .unwrap();
        update_artist_profile(&pool, id, None, None, Some("[\"https://band.example\"]"))
            .await
            .unwrap();

        let artist = get_artist(&pool, id).await.unwrap().unwrap();
        assert_eq!(artist.bio.as_deref(), Some("Formed in 1999"));
        assert_eq!(artist.avatar_path.as_deref(), Some("/a.jpg"));
        assert!(artist.links.is_some());
    }

    #[tokio::test]
    async fn test_album_update_keeps_artist_and_flags() {
        let (pool, _dir) = temp_db().await;
        let first = get_or_create_artist(&pool, "First").await.unwrap();
        let second = get_or_create_artist(&pool, "Second").await.unwrap();

        let fields = AlbumFields {
            title: "Demo".to_string(),
            slug: "demo".to_string(),
            artist_id: Some(first),
            ..Default::default()
        };
        let album_id = create_album(&pool, &fields, true, "unlisted").await.unwrap();

        let refresh = AlbumFields {
            artist_id: Some(second),
            download: Some("free".to_string()),
            ..fields.clone()
        };
        update_album_from_config(&pool, album_id, &refresh).await.unwrap();

        let album = get_album(&pool, album_id).await.unwrap().unwrap();
        assert_eq!(album.artist_id, Some(first));
        assert_eq!(album.download.as_deref(), Some("free"));
        assert!(album.is_release);
        assert_eq!(album.visibility, "unlisted");
    }

    #[tokio::test]
    async fn test_track_lookup_by_either_path() {
        let (pool, _dir) = temp_db().await;

        let id = insert_track(
            &pool,
            &NewTrack {
                lossless_path: Some("/m/song.wav".to_string()),
                ..local_track("Song", "/m/song.mp3")
            },
        )
        .await
        .unwrap();

        let by_primary = get_track_by_path(&pool, "/m/song.mp3").await.unwrap().unwrap();
        let by_lossless = get_track_by_path(&pool, "/m/song.wav").await.unwrap().unwrap();
        assert_eq!(by_primary.id, id);
        assert_eq!(by_lossless.id, id);
        assert!(get_track_by_path(&pool, "/m/other.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_track_identity_matches_nulls() {
        let (pool, _dir) = temp_db().await;
        let id = insert_track(&pool, &local_track("Song", "/m/song.mp3"))
            .await
            .unwrap();

        let found = get_track_by_identity(&pool, "Song", None, None).await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(id));

        let missing = get_track_by_identity(&pool, "Song", Some(1), None).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_path_updates_and_delete() {
        let (pool, _dir) = temp_db().await;
        let id = insert_track(&pool, &local_track("Song", "/m/song.wav"))
            .await
            .unwrap();

        update_track_paths(&pool, id, Some("/m/song.mp3"), Some("/m/song.wav"))
            .await
            .unwrap();
        let track = get_track_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(track.file_path.as_deref(), Some("/m/song.mp3"));
        assert_eq!(track.lossless_path.as_deref(), Some("/m/song.wav"));

        clear_lossless_path(&pool, id).await.unwrap();
        let track = get_track_by_id(&pool, id).await.unwrap().unwrap();
        assert!(track.lossless_path.is_none());

        assert!(delete_track(&pool, id).await.unwrap());
        assert!(!delete_track(&pool, id).await.unwrap());
    }

    #[tokio::test]
    async fn test_album_track_artist_ids_are_distinct() {
        let (pool, _dir) = temp_db().await;
        let album_id = create_album(
            &pool,
            &AlbumFields {
                title: "Split".to_string(),
                slug: "split".to_string(),
                ..Default::default()
            },
            false,
            "private",
        )
        .await
        .unwrap();
        let a = get_or_create_artist(&pool, "A").await.unwrap();

        for (i, artist) in [Some(a), Some(a), None].into_iter().enumerate() {
            insert_track(
                &pool,
                &NewTrack {
                    album_id: Some(album_id),
                    artist_id: artist,
                    ..local_track(&format!("T{i}"), &format!("/m/{i}.mp3"))
                },
            )
            .await
            .unwrap();
        }

        let ids = get_album_track_artist_ids(&pool, album_id).await.unwrap();
        assert_eq!(ids, vec![a]);
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let (pool, _dir) = temp_db().await;
        set_setting(&pool, "site_title", "Old").await.unwrap();
        set_setting(&pool, "site_title", "New").await.unwrap();
        assert_eq!(
            get_setting(&pool, "site_title").await.unwrap().as_deref(),
            Some("New")
        );
        assert!(get_setting(&pool, "missing").await.unwrap().is_none());
    }
}
