//! Ingest sidecar configs into the database.
//!
//! Runs in two passes over the YAML files found by the walk:
//!
//! 1. [`process_global`]: `artist.yaml` creates or updates artists and
//!    registers artist folders; `catalog.yaml` writes site settings.
//! 2. [`process_releases`]: each `release.yaml` resolves (or creates) its
//!    album and registers the release folder for track pairing.
//!
//! A broken sidecar is logged and skipped; it never stops the scan.

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use super::cover::{find_cover, resolve_relative};
use super::sidecar::{self, ArtistConfig, CatalogConfig, ReleaseConfig, SidecarKind, json_or_string};
use crate::db;
use crate::error::{Error, Result};
use crate::library::{AlbumRef, ScanContext};
use crate::model::{AlbumFields, NewTrack};
use crate::scanner::path_string;

/// Settings keys written from `catalog.yaml`.
pub mod settings {
    pub const SITE_TITLE: &str = "site_title";
    pub const SITE_DESCRIPTION: &str = "site_description";
    pub const SITE_URL: &str = "site_url";
    pub const DONATION_LINKS: &str = "donation_links";
}

/// Counts for one config pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigSummary {
    pub processed: usize,
    pub failed: usize,
}

impl ConfigSummary {
    fn record<T>(&mut self, path: &Path, result: Result<T>) {
        match result {
            Ok(_) => self.processed += 1,
            Err(e) => {
                self.failed += 1;
                tracing::warn!(
                    target: "catalog::processor",
                    path = %path.display(),
                    error = %e,
                    "Skipping sidecar"
                );
            }
        }
    }
}

/// Pass 1: artists and site settings.
pub async fn process_global(
    pool: &SqlitePool,
    ctx: &mut ScanContext,
    config_files: &[PathBuf],
) -> ConfigSummary {
    let mut summary = ConfigSummary::default();
    for path in config_files {
        match SidecarKind::of(path) {
            Some(SidecarKind::Artist) => {
                let result = apply_artist(pool, ctx, path).await;
                summary.record(path, result);
            }
            Some(SidecarKind::Catalog) => {
                let result = apply_catalog(pool, path).await;
                summary.record(path, result);
            }
            _ => {}
        }
    }
    summary
}

/// Pass 2: releases. Must run after [`process_global`] so artist folders are known.
pub async fn process_releases(
    pool: &SqlitePool,
    ctx: &mut ScanContext,
    config_files: &[PathBuf],
) -> ConfigSummary {
    claim_release_slugs(ctx, config_files).await;

    let mut summary = ConfigSummary::default();
    for path in config_files {
        if SidecarKind::of(path) == Some(SidecarKind::Release) {
            let result = apply_release(pool, ctx, path).await;
            summary.record(path, result);
        }
    }
    summary
}

/// Title and slug a release is stored under.
///
/// The title falls back to the folder name. The slug comes from an explicit
/// `slug:`, else the title, else the folder name, else a hash of the title.
fn release_identity(config: &ReleaseConfig, dir: &Path) -> Option<(String, String)> {
    let title = config
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .or_else(|| folder_name(dir))?;
    let slug = config
        .slug()
        .or_else(|| {
            folder_name(dir)
                .map(|name| sidecar::slugify(&name))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| sidecar::fallback_slug(&title));
    Some((title, slug))
}

/// Record the slug of every readable `release.yaml` so folder matching never
/// takes over an album another release still describes.
pub async fn claim_release_slugs(ctx: &mut ScanContext, config_files: &[PathBuf]) {
    for path in config_files {
        if SidecarKind::of(path) != Some(SidecarKind::Release) {
            continue;
        }
        let Ok(config) = sidecar::load::<ReleaseConfig>(path).await else {
            continue;
        };
        if let Some((_, slug)) = path.parent().and_then(|dir| release_identity(&config, dir)) {
            ctx.claim_slug(slug);
        }
    }
}

fn folder_name(dir: &Path) -> Option<String> {
    dir.file_name().map(|n| n.to_string_lossy().to_string())
}

fn sidecar_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| Error::sidecar(path, "Sidecar has no parent directory"))
}

/// Create or update the artist described by an `artist.yaml`.
pub async fn apply_artist(pool: &SqlitePool, ctx: &mut ScanContext, path: &Path) -> Result<i64> {
    let config: ArtistConfig = sidecar::load(path).await?;
    let dir = sidecar_dir(path)?;

    let name = config
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .or_else(|| folder_name(dir))
        .ok_or_else(|| Error::sidecar(path, "Artist has no name"))?;

    let artist_id = db::get_or_create_artist(pool, &name).await?;

    let avatar = config
        .avatar
        .as_deref()
        .map(|a| resolve_relative(dir, a))
        .filter(|p| p.is_file())
        .map(|p| path_string(&p));
    let links = config.links.as_ref().and_then(json_or_string);

    db::update_artist_profile(
        pool,
        artist_id,
        config.bio.as_deref(),
        avatar.as_deref(),
        links.as_deref(),
    )
    .await?;

    ctx.register_artist_folder(dir, artist_id);

    tracing::debug!(target: "catalog::processor", artist = %name, artist_id, "Artist config applied");
    Ok(artist_id)
}

/// Write site settings from a `catalog.yaml`.
pub async fn apply_catalog(pool: &SqlitePool, path: &Path) -> Result<()> {
    let config: CatalogConfig = sidecar::load(path).await?;

    let donation_links = config.donation_links.as_ref().and_then(json_or_string);
    let entries = [
        (settings::SITE_TITLE, config.title.as_deref()),
        (settings::SITE_DESCRIPTION, config.description.as_deref()),
        (settings::SITE_URL, config.url.as_deref()),
        (settings::DONATION_LINKS, donation_links.as_deref()),
    ];
    for (key, value) in entries {
        if let Some(value) = value {
            db::set_setting(pool, key, value).await?;
        }
    }
    Ok(())
}

/// Resolve, refresh or create the album described by a `release.yaml`.
///
/// Publication flags are only taken from the file when the album is new.
pub async fn apply_release(
    pool: &SqlitePool,
    ctx: &mut ScanContext,
    path: &Path,
) -> Result<AlbumRef> {
    let config: ReleaseConfig = sidecar::load(path).await?;
    let dir = sidecar_dir(path)?;

    let (title, slug) = release_identity(&config, dir)
        .ok_or_else(|| Error::sidecar(path, "Release has no title"))?;

    let artist_id = match config.artist.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        Some(name) => Some(db::get_or_create_artist(pool, name).await?),
        None => ctx.artist_for_dir(dir),
    };

    let fields = AlbumFields {
        title,
        slug,
        artist_id,
        cover_path: find_cover(dir, config.cover.as_deref()).map(|p| path_string(&p)),
        date: config.date.clone(),
        year: config.year(),
        description: config.description.clone(),
        genres: config
            .genres
            .as_ref()
            .map(|g| serde_json::Value::from(g.clone()).to_string()),
        release_type: config.release_type.clone(),
        download: config.download(),
        external_links: config.links.as_ref().and_then(json_or_string),
    };

    let existing = match db::get_album_by_slug(pool, &fields.slug).await? {
        Some(album) => Some(album),
        None => match ctx.existing_album_for_release(dir) {
            Some(id) => db::get_album(pool, id)
                .await?
                // Another release.yaml still describes that album
                .filter(|album| !ctx.is_slug_claimed(&album.slug)),
            None => None,
        },
    };

    let album = match existing {
        Some(album) => {
            if album.slug != fields.slug {
                tracing::info!(
                    target: "catalog::processor",
                    album_id = album.id,
                    old = %album.slug,
                    new = %fields.slug,
                    "Release matched by folder, refreshing slug"
                );
            }
            db::update_album_from_config(pool, album.id, &fields).await?;
            AlbumRef {
                id: album.id,
                artist_id: album.artist_id.or(artist_id),
            }
        }
        None => {
            let id = db::create_album(pool, &fields, true, config.visibility()).await?;
            tracing::info!(
                target: "catalog::processor",
                album_id = id,
                slug = %fields.slug,
                "Created release"
            );
            AlbumRef { id, artist_id }
        }
    };

    ctx.register_album_folder(dir, album);
    sync_external_tracks(pool, album, &config).await?;

    Ok(album)
}

/// Create rows for `metadata.tracks` entries not seen before.
async fn sync_external_tracks(
    pool: &SqlitePool,
    album: AlbumRef,
    config: &ReleaseConfig,
) -> Result<usize> {
    let mut created = 0;
    for (index, entry) in config.external_tracks().iter().enumerate() {
        let Some(url) = entry.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            continue;
        };
        if db::get_track_by_url(pool, Some(album.id), url).await?.is_some() {
            continue;
        }

        let track = NewTrack {
            title: entry
                .title
                .clone()
                .unwrap_or_else(|| format!("Track {}", index + 1)),
            album_id: Some(album.id),
            artist_id: album.artist_id,
            track_num: entry.track_num.or(Some(index as i64 + 1)),
            duration: entry.duration,
            url: Some(url.to_string()),
            service: entry.service.clone(),
            external_artwork: entry.artwork.clone(),
            ..Default::default()
        };
        db::insert_track(pool, &track).await?;
        created += 1;
    }
    if created > 0 {
        tracing::debug!(target: "catalog::processor", album_id = album.id, created, "External tracks added");
    }
    Ok(created)
}
