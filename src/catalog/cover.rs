//! Locate release cover art next to a release.yaml.

use std::path::{Path, PathBuf};

/// Conventional cover filenames, tried in order.
const COVER_FILENAMES: &[&str] = &["cover", "folder", "front", "artwork", "album"];

/// Supported image extensions
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Resolve a path from a sidecar relative to the sidecar's directory.
pub fn resolve_relative(dir: &Path, value: &str) -> PathBuf {
    let candidate = Path::new(value.trim());
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    }
}

/// The explicit `cover:` if it exists, else the first conventional file found.
pub fn find_cover(release_dir: &Path, explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
        let path = resolve_relative(release_dir, value);
        if path.is_file() {
            return Some(path);
        }
        tracing::debug!(
            target: "catalog::cover",
            cover = %path.display(),
            "Configured cover not found, trying conventional names"
        );
    }

    COVER_FILENAMES
        .iter()
        .flat_map(|name| {
            IMAGE_EXTENSIONS
                .iter()
                .map(move |ext| release_dir.join(format!("{}.{}", name, ext)))
        })
        .find(|p| p.is_file())
}
