//! Audio file metadata reading.
//!
//! Uses the lofty crate for format-independent tag access. Reads happen on a
//! blocking thread and are wrapped in a [`RetryPolicy`] because files handed
//! over by the watcher may still be mid-copy or mid-conversion.
//!
//! # Features
//! - Tag fields (title, artist, album, track number)
//! - Technical fields (duration, bitrate, sample rate, format)
//! - Transient failures are retried, permanent ones are not

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lofty::error::{ErrorKind as LoftyErrorKind, LoftyError};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;

use crate::error::{Error, Result, is_transient_io};
use crate::retry::RetryPolicy;

/// Artist tag value treated as "no artist".
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Metadata read from an audio file.
///
/// Tag fields are `None` when the file carries no such tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Audio bitrate in kbps
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    /// Lowercase container/codec name, e.g. "mp3" or "flac"
    pub format: Option<String>,
}

impl TrackMetadata {
    /// Tag title, falling back to the file stem.
    pub fn title_or_stem(&self, path: &Path) -> String {
        self.title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            })
    }

    /// Tag artist unless it is missing, blank or the "Unknown Artist" placeholder.
    pub fn known_artist(&self) -> Option<&str> {
        self.artist
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty() && *a != UNKNOWN_ARTIST)
    }
}

/// Something that can parse tags out of an audio file.
///
/// Implementations are synchronous; [`MetadataExtractor`] moves calls onto a
/// blocking thread.
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TrackMetadata>;
}

/// [`MetadataReader`] backed by lofty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyReader;

impl MetadataReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<TrackMetadata> {
        let tagged_file = Probe::open(path)
            .and_then(|p| p.read())
            .map_err(|e| lofty_error(path, e))?;

        // Get the primary tag, or fall back to the first available tag
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());

        let properties = tagged_file.properties();
        let duration = properties.duration();

        Ok(TrackMetadata {
            title: tag.and_then(|t| t.title().map(|s| s.to_string())),
            artist: tag.and_then(|t| t.artist().map(|s| s.to_string())),
            album: tag.and_then(|t| t.album().map(|s| s.to_string())),
            track_number: tag.and_then(|t| t.track()),
            duration: (!duration.is_zero()).then(|| duration.as_secs_f64()),
            bitrate: properties.audio_bitrate(),
            sample_rate: properties.sample_rate(),
            format: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
        })
    }
}

fn lofty_error(path: &Path, err: LoftyError) -> Error {
    let transient = match err.kind() {
        LoftyErrorKind::Io(io) => is_transient_io(io.kind()),
        // A file still being written has headers that promise more than is there
        LoftyErrorKind::SizeMismatch | LoftyErrorKind::TooMuchData => true,
        _ => false,
    };
    Error::Metadata {
        path: path.to_path_buf(),
        message: err.to_string(),
        transient,
    }
}

/// Reads metadata with retry on transient failures.
#[derive(Clone)]
pub struct MetadataExtractor {
    reader: Arc<dyn MetadataReader>,
    retry: RetryPolicy,
}

impl MetadataExtractor {
    pub fn new(reader: Arc<dyn MetadataReader>, retry: RetryPolicy) -> Self {
        Self { reader, retry }
    }

    /// Lofty-backed extractor with the default retry policy.
    pub fn lofty() -> Self {
        Self::new(Arc::new(LoftyReader), RetryPolicy::default())
    }

    /// Read metadata for `path`.
    ///
    /// Returns the last error once the retry budget is exhausted.
    pub async fn extract(&self, path: &Path) -> Result<TrackMetadata> {
        let what = path.display().to_string();
        self.retry
            .run(&what, || {
                let reader = Arc::clone(&self.reader);
                let path: PathBuf = path.to_path_buf();
                async move {
                    tokio::task::spawn_blocking(move || reader.read(&path))
                        .await
                        .map_err(|e| Error::TaskPanicked(e.to_string()))?
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_non_audio_file_returns_error() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "This is just some text, not music.").expect("Failed to write");

        let result = LoftyReader.read(file.path());
        assert!(matches!(result, Err(Error::Metadata { transient: false, .. })));
    }

    #[test]
    fn test_read_non_existent_file_is_transient() {
        let result = LoftyReader.read(Path::new("non_existent_file.mp3"));
        let err = result.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_truncated_file_errors_are_transient() {
        let path = Path::new("half-copied.flac");
        assert!(lofty_error(path, LoftyError::new(LoftyErrorKind::SizeMismatch)).is_transient());
        assert!(lofty_error(path, LoftyError::new(LoftyErrorKind::TooMuchData)).is_transient());
        assert!(!lofty_error(path, LoftyError::new(LoftyErrorKind::UnknownFormat)).is_transient());
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let meta = TrackMetadata::default();
        assert_eq!(meta.title_or_stem(Path::new("/m/Opening.flac")), "Opening");

        let meta = TrackMetadata {
            title: Some("Real Title".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.title_or_stem(Path::new("/m/x.mp3")), "Real Title");
    }

    #[test]
    fn test_unknown_artist_is_ignored() {
        let meta = TrackMetadata {
            artist: Some(UNKNOWN_ARTIST.to_string()),
            ..Default::default()
        };
        assert_eq!(meta.known_artist(), None);

        let meta = TrackMetadata {
            artist: Some(" Queen ".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.known_artist(), Some("Queen"));
    }

    struct FlakyReader {
        calls: AtomicU32,
        fail_times: u32,
    }

    impl MetadataReader for FlakyReader {
        fn read(&self, path: &Path) -> Result<TrackMetadata> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_times {
                Err(Error::transient_metadata(path, "file still being written"))
            } else {
                Ok(TrackMetadata {
                    title: Some("Settled".to_string()),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn test_extractor_retries_transient_errors() {
        let reader = Arc::new(FlakyReader {
            calls: AtomicU32::new(0),
            fail_times: 2,
        });
        let extractor = MetadataExtractor::new(
            reader.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let meta = extractor.extract(Path::new("/m/a.mp3")).await.unwrap();
        assert_eq!(meta.title.as_deref(), Some("Settled"));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_extractor_propagates_after_exhaustion() {
        let reader = Arc::new(FlakyReader {
            calls: AtomicU32::new(0),
            fail_times: 10,
        });
        let extractor = MetadataExtractor::new(
            reader.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let result = extractor.extract(Path::new("/m/a.mp3")).await;
        assert!(result.is_err());
        assert_eq!(reader.calls.load(Ordering::SeqCst), 3);
    }
}
