//! Core data models for the reconciled library.
//!
//! Defines the primary entities: [`Track`], [`Artist`], and [`Album`].
//! These are derived from SQLx for database mapping.
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `artists` - Artist records with unique names
//! - `albums` - Albums (releases when publicly cataloged) keyed by slug
//! - `tracks` - Playable songs, local or external
//! - `settings` - Site-level key/value settings from `catalog.yaml`

use std::path::Path;

use sqlx::FromRow;

use crate::scanner::is_lossless_file;

/// An artist in the library.
#[derive(Debug, Clone, FromRow)]
pub struct Artist {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Artist name (unique)
    pub name: String,
    pub bio: Option<String>,
    /// Absolute path of the avatar image
    pub avatar_path: Option<String>,
    /// JSON array of links
    pub links: Option<String>,
}

/// An album. Called a release when `is_release` is set.
#[derive(Debug, Clone, FromRow)]
pub struct Album {
    /// Database ID (auto-generated)
    pub id: i64,
    pub title: String,
    /// Primary identity key when a release.yaml is processed again
    pub slug: String,
    /// Optional artist ID (albums can exist without artist)
    pub artist_id: Option<i64>,
    pub cover_path: Option<String>,
    pub date: Option<String>,
    pub year: Option<i64>,
    pub description: Option<String>,
    /// JSON array of genre names
    pub genres: Option<String>,
    /// album, single or ep
    pub release_type: Option<String>,
    pub download: Option<String>,
    /// JSON array of links
    pub external_links: Option<String>,
    pub is_release: bool,
    /// public, unlisted or private
    pub visibility: String,
}

/// A track in the library.
#[derive(Debug, Clone, FromRow)]
pub struct Track {
    /// Database ID (auto-generated)
    pub id: i64,
    pub title: String,
    pub album_id: Option<i64>,
    pub artist_id: Option<i64>,
    pub track_num: Option<i64>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Canonical playable path, normally a lossy format (unique)
    pub file_path: Option<String>,
    /// Archival wav/flac sibling of `file_path`
    pub lossless_path: Option<String>,
    pub format: Option<String>,
    pub bitrate: Option<i64>,
    pub sample_rate: Option<i64>,
    /// JSON array of normalized peaks
    pub waveform: Option<String>,
    /// Stream URL for tracks without a local file
    pub url: Option<String>,
    pub service: Option<String>,
    pub external_artwork: Option<String>,
}

impl Track {
    /// Whether this row points at a remote stream instead of a local file.
    pub fn is_external(&self) -> bool {
        self.file_path.is_none() && self.url.is_some()
    }

    /// Whether `path` is either of this track's local files.
    pub fn references(&self, path: &str) -> bool {
        self.file_path.as_deref() == Some(path) || self.lossless_path.as_deref() == Some(path)
    }

    /// Whether the primary slot currently holds a lossless file.
    pub fn primary_is_lossless(&self) -> bool {
        self.file_path
            .as_deref()
            .is_some_and(|p| is_lossless_file(Path::new(p)))
    }
}

/// Fields for inserting a new track.
#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub title: String,
    pub album_id: Option<i64>,
    pub artist_id: Option<i64>,
    pub track_num: Option<i64>,
    pub duration: Option<f64>,
    pub file_path: Option<String>,
    pub lossless_path: Option<String>,
    pub format: Option<String>,
    pub bitrate: Option<i64>,
    pub sample_rate: Option<i64>,
    pub url: Option<String>,
    pub service: Option<String>,
    pub external_artwork: Option<String>,
}

/// Fields for inserting or refreshing an album from a release.yaml.
///
/// `None` means "leave as is" when updating.
#[derive(Debug, Clone, Default)]
pub struct AlbumFields {
    pub title: String,
    pub slug: String,
    pub artist_id: Option<i64>,
    pub cover_path: Option<String>,
    pub date: Option<String>,
    pub year: Option<i64>,
    pub description: Option<String>,
    pub genres: Option<String>,
    pub release_type: Option<String>,
    pub download: Option<String>,
    pub external_links: Option<String>,
}
