//! File classification and path normalization.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Recognized audio extensions (lowercase, without the dot).
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a", "aac", "opus"];

/// Lossless extensions kept as archival siblings.
pub const LOSSLESS_EXTENSIONS: &[&str] = &["wav", "flac"];

/// Sidecar config extensions.
pub const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml"];

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Check if a path is an audio file by extension.
pub fn is_audio_file(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
}

/// Check if a path is a wav or flac file.
pub fn is_lossless_file(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|e| LOSSLESS_EXTENSIONS.contains(&e.as_str()))
}

/// Check if a path is a YAML sidecar.
pub fn is_config_file(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|e| CONFIG_EXTENSIONS.contains(&e.as_str()))
}

/// Check if a path has the given extension, ignoring case.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    lowercase_extension(path).is_some_and(|e| e == ext)
}

/// The `.mp3` file a lossless source converts into.
pub fn mp3_sibling(path: &Path) -> PathBuf {
    path.with_extension("mp3")
}

/// Same directory and stem with every other recognized audio extension.
///
/// Both lowercase and uppercase spellings are produced so `Track.FLAC` pairs
/// with `Track.mp3`.
pub fn sibling_candidates(path: &Path) -> Vec<PathBuf> {
    let own = lowercase_extension(path);
    AUDIO_EXTENSIONS
        .iter()
        .filter(|ext| own.as_deref() != Some(**ext))
        .flat_map(|ext| {
            [
                path.with_extension(ext),
                path.with_extension(ext.to_uppercase()),
            ]
        })
        .collect()
}

/// Convert a path to the string form stored in the database.
pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Whether path comparisons on the library filesystem ignore case.
///
/// Injected rather than inferred from the host platform so tests behave the
/// same everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemCasePolicy {
    #[default]
    Sensitive,
    Insensitive,
}

impl FilesystemCasePolicy {
    /// The usual behaviour of the host platform's default filesystem.
    pub fn host_default() -> Self {
        if cfg!(any(target_os = "windows", target_os = "macos")) {
            Self::Insensitive
        } else {
            Self::Sensitive
        }
    }

    /// Normalize a path relative to `root`: forward slashes, case folded if
    /// the filesystem ignores case. Paths outside `root` yield `None`.
    pub fn relative_key(&self, root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        Some(self.fold(&forward_slashes(rel)))
    }

    /// Normalize an absolute directory path for use as a cache key.
    pub fn dir_key(&self, dir: &Path) -> String {
        let s = forward_slashes(dir);
        self.fold(s.trim_end_matches('/'))
    }

    fn fold(&self, s: &str) -> String {
        match self {
            Self::Sensitive => s.to_string(),
            Self::Insensitive => s.to_lowercase(),
        }
    }
}

fn forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replacen("//", "/", 1)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Keys never contain backslashes or a leading slash
        #[test]
        fn relative_keys_are_forward_slashed(segments in prop::collection::vec("[a-zA-Z0-9 _-]{1,12}", 1..5)) {
            let root = PathBuf::from("/library");
            let mut path = root.clone();
            for s in &segments {
                path.push(s);
            }
            let key = FilesystemCasePolicy::Insensitive.relative_key(&root, &path).unwrap();
            prop_assert!(!key.contains('\\'));
            prop_assert!(!key.starts_with('/'));
            prop_assert_eq!(key.clone(), key.to_lowercase());
            prop_assert_eq!(key.split('/').count(), segments.len());
        }
    }
}
