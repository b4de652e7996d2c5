//! YAML sidecar formats: `artist.yaml`, `catalog.yaml` and `release.yaml`.
//!
//! Sidecars are written by hand, so parsing is lenient: unknown keys are
//! ignored, and scalar fields accept numbers or strings (`date: 2024` and
//! `date: "2024-03-01"` both work).

use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};

/// Which sidecar a YAML file is, by file stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarKind {
    Artist,
    Catalog,
    Release,
}

impl SidecarKind {
    /// Classify a `.yaml`/`.yml` path. Other YAML files are not sidecars.
    pub fn of(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_lowercase();
        match stem.as_str() {
            "artist" => Some(Self::Artist),
            "catalog" => Some(Self::Catalog),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

/// `artist.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtistConfig {
    pub name: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub bio: Option<String>,
    /// Relative or absolute avatar image path; `image` is accepted too
    #[serde(alias = "image")]
    pub avatar: Option<String>,
    pub links: Option<Value>,
}

/// `catalog.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogConfig {
    #[serde(deserialize_with = "scalar_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub description: Option<String>,
    pub url: Option<String>,
    pub donation_links: Option<Value>,
}

/// `release.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    #[serde(deserialize_with = "scalar_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub date: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub description: Option<String>,
    pub cover: Option<String>,
    pub genres: Option<Vec<String>>,
    pub artist: Option<String>,
    /// album, single, ep
    #[serde(rename = "type")]
    pub release_type: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub year: Option<i64>,
    pub download: Option<Value>,
    pub links: Option<Value>,
    pub slug: Option<String>,
    pub visibility: Option<String>,
    pub metadata: Option<ReleaseMetadata>,
}

/// The optional `metadata:` block of a release.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseMetadata {
    pub tracks: Vec<ExternalTrackConfig>,
}

/// A track hosted elsewhere, listed under `metadata.tracks`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalTrackConfig {
    pub url: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub title: Option<String>,
    pub track_num: Option<i64>,
    pub duration: Option<f64>,
    pub service: Option<String>,
    pub artwork: Option<String>,
}

/// Album visibility values accepted in `release.yaml`.
pub const VISIBILITIES: &[&str] = &["public", "unlisted", "private"];

/// Visibility a brand-new release gets when none is given.
pub const DEFAULT_VISIBILITY: &str = "public";

impl ReleaseConfig {
    /// Explicit slug, or one derived from the title.
    pub fn slug(&self) -> Option<String> {
        self.slug
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .or_else(|| self.title.as_deref().map(slugify).filter(|s| !s.is_empty()))
    }

    /// Explicit year, else the leading four digits of `date`.
    pub fn year(&self) -> Option<i64> {
        self.year.or_else(|| {
            let date = self.date.as_deref()?;
            let digits: String = date.chars().take(4).collect();
            (digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()))
                .then(|| digits.parse().ok())
                .flatten()
        })
    }

    /// Normalized visibility; unknown values fall back to the default.
    pub fn visibility(&self) -> &str {
        match self.visibility.as_deref().map(str::trim) {
            Some(v) => VISIBILITIES
                .iter()
                .copied()
                .find(|known| known.eq_ignore_ascii_case(v))
                .unwrap_or(DEFAULT_VISIBILITY),
            None => DEFAULT_VISIBILITY,
        }
    }

    /// `download` as stored: plain strings as-is, anything else as JSON.
    pub fn download(&self) -> Option<String> {
        self.download.as_ref().and_then(json_or_string)
    }

    pub fn external_tracks(&self) -> &[ExternalTrackConfig] {
        self.metadata
            .as_ref()
            .map(|m| m.tracks.as_slice())
            .unwrap_or_default()
    }
}

/// Store a YAML value in a TEXT column. Null becomes `None`.
pub fn json_or_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Identifier for a title: lowercase alphanumerics (any script) separated by
/// single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase().filter(|l| l.is_alphanumeric()));
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Stable slug for a title with nothing sluggable in it (e.g. only
/// punctuation or emoji).
pub fn fallback_slug(title: &str) -> String {
    // FNV-1a, fixed so the slug survives toolchain upgrades
    let hash = title.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    format!("release-{hash:016x}")
}

/// Parse a sidecar file.
pub fn parse<T: for<'de> Deserialize<'de> + Default>(path: &Path, contents: &str) -> Result<T> {
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(contents).map_err(|e| Error::sidecar(path, e.to_string()))
}

/// Read and parse a sidecar file.
pub async fn load<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::sidecar(path, e.to_string()))?;
    parse(path, &contents)
}

fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_i64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {s:?}"))),
        Some(other) => Err(serde::de::Error::custom(format!("expected a number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_kind() {
        assert_eq!(SidecarKind::of(Path::new("/m/artist.yaml")), Some(SidecarKind::Artist));
        assert_eq!(SidecarKind::of(Path::new("/m/Release.YML")), Some(SidecarKind::Release));
        assert_eq!(SidecarKind::of(Path::new("/m/catalog.yml")), Some(SidecarKind::Catalog));
        assert_eq!(SidecarKind::of(Path::new("/m/notes.yaml")), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Demo"), "demo");
        assert_eq!(slugify("  The Best -- Of!! "), "the-best-of");
        assert_eq!(slugify("Café Del Mar"), "café-del-mar");
        assert_eq!(slugify("東京"), "東京");
        assert_eq!(slugify("Привет, Мир"), "привет-мир");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_fallback_slug_is_stable() {
        assert_eq!(fallback_slug("***"), fallback_slug("***"));
        assert_ne!(fallback_slug("***"), fallback_slug("!!!"));
        assert!(fallback_slug("").starts_with("release-"));
    }

    #[test]
    fn test_quoted_year() {
        let release: ReleaseConfig =
            parse(Path::new("release.yaml"), "title: X\nyear: \"2020\"\n").unwrap();
        assert_eq!(release.year(), Some(2020));

        let release: ReleaseConfig = parse(Path::new("release.yaml"), "title: X\nyear: 1999\n").unwrap();
        assert_eq!(release.year(), Some(1999));

        let result: Result<ReleaseConfig> = parse(Path::new("release.yaml"), "year: soon\n");
        assert!(matches!(result, Err(Error::Sidecar { .. })));
    }

    #[test]
    fn test_release_parsing() {
        let yaml = r#"
title: "Night Drive"
date: 2023-10-01
type: ep
genres: [synthwave, electronic]
download: free
visibility: Unlisted
metadata:
  tracks:
    - url: https://example.com/a
      title: Intro
      trackNum: 1
      duration: 61.5
      service: bandcamp
"#;
        let release: ReleaseConfig = parse(Path::new("release.yaml"), yaml).unwrap();
        assert_eq!(release.title.as_deref(), Some("Night Drive"));
        assert_eq!(release.slug().as_deref(), Some("night-drive"));
        assert_eq!(release.year(), Some(2023));
        assert_eq!(release.release_type.as_deref(), Some("ep"));
        assert_eq!(release.download().as_deref(), Some("free"));
        assert_eq!(release.visibility(), "unlisted");

        let tracks = release.external_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_num, Some(1));
        assert_eq!(tracks[0].service.as_deref(), Some("bandcamp"));
    }

    #[test]
    fn test_release_scalar_leniency() {
        let yaml = "title: 1999\ndate: 2001\n";
        let release: ReleaseConfig = parse(Path::new("release.yaml"), yaml).unwrap();
        assert_eq!(release.title.as_deref(), Some("1999"));
        assert_eq!(release.year(), Some(2001));
        assert_eq!(release.visibility(), DEFAULT_VISIBILITY);
    }

    #[test]
    fn test_explicit_slug_wins() {
        let release = ReleaseConfig {
            title: Some("Demo".to_string()),
            slug: Some("first-demo".to_string()),
            ..Default::default()
        };
        assert_eq!(release.slug().as_deref(), Some("first-demo"));
    }

    #[test]
    fn test_download_object_is_stored_as_json() {
        let yaml = "title: X\ndownload:\n  mode: paid\n  price: 5\n";
        let release: ReleaseConfig = parse(Path::new("release.yaml"), yaml).unwrap();
        let download = release.download().unwrap();
        assert!(download.starts_with('{'));
        assert!(download.contains("\"paid\""));
    }

    #[test]
    fn test_artist_image_alias() {
        let yaml = "name: Band\nimage: band.jpg\nlinks:\n  - https://band.example\n";
        let artist: ArtistConfig = parse(Path::new("artist.yaml"), yaml).unwrap();
        assert_eq!(artist.avatar.as_deref(), Some("band.jpg"));
        assert!(artist.links.is_some());
    }

    #[test]
    fn test_catalog_camel_case() {
        let yaml = "title: My Label\ndonationLinks:\n  - https://donate.example\n";
        let catalog: CatalogConfig = parse(Path::new("catalog.yaml"), yaml).unwrap();
        assert_eq!(catalog.title.as_deref(), Some("My Label"));
        assert!(catalog.donation_links.is_some());
    }

    #[test]
    fn test_malformed_yaml_is_sidecar_error() {
        let result: Result<ReleaseConfig> = parse(Path::new("release.yaml"), "title: [unclosed");
        assert!(matches!(result, Err(Error::Sidecar { .. })));
    }

    #[test]
    fn test_empty_file_is_default() {
        let release: ReleaseConfig = parse(Path::new("release.yaml"), "\n").unwrap();
        assert!(release.title.is_none());
    }
}
