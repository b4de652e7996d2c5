//! Conversion and probing by shelling out to `ffmpeg` and `ffprobe`.
//!
//! Install:
//! - Windows: `winget install Gyan.FFmpeg`
//! - macOS: `brew install ffmpeg`
//! - Linux: `apt install ffmpeg` or equivalent

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::AudioConverter;
use crate::config::ProcessingConfig;
use crate::error::{Error, Result};

/// [`AudioConverter`] backed by the ffmpeg command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    ffmpeg: String,
    ffprobe: String,
    bitrate: String,
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

impl FfmpegConverter {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            bitrate: config.mp3_bitrate.clone(),
        }
    }

    /// Arguments for encoding `source` into `partial`.
    fn encode_args(&self, source: &Path, partial: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-map_metadata".to_string(),
            "0".to_string(),
            "-codec:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
            "-f".to_string(),
            "mp3".to_string(),
            partial.to_string_lossy().to_string(),
        ]
    }
}

/// Temporary output next to the target; renamed into place once complete so
/// watchers never see a half-written mp3.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find_map(|line| line.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert_to_mp3(&self, source: &Path, target: &Path) -> Result<()> {
        let partial = partial_path(target);

        tracing::info!(
            target: "media::ffmpeg",
            source = %source.display(),
            output = %target.display(),
            "Converting to mp3"
        );

        let output = Command::new(&self.ffmpeg)
            .args(self.encode_args(source, &partial))
            .output()
            .await
            .map_err(|e| Error::conversion(source, format!("Failed to run {}: {}", self.ffmpeg, e)))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::conversion(
                source,
                format!("ffmpeg failed: {}", stderr.trim()),
            ));
        }

        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| Error::conversion(source, format!("Failed to move output: {}", e)))?;
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::conversion(path, format!("Failed to run {}: {}", self.ffprobe, e)))?;

        if !output.status.success() {
            tracing::debug!(
                target: "media::ffmpeg",
                path = %path.display(),
                "ffprobe could not read duration"
            );
            return Ok(None);
        }

        Ok(parse_duration(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("183.466939\n"), Some(183.466939));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("0.000000"), None);
    }

    #[test]
    fn test_partial_path_keeps_directory() {
        let partial = partial_path(Path::new("/m/album/song.mp3"));
        assert_eq!(partial, PathBuf::from("/m/album/song.mp3.part"));
    }

    #[test]
    fn test_encode_args_use_configured_bitrate() {
        let converter = FfmpegConverter::from_config(&ProcessingConfig {
            mp3_bitrate: "192k".to_string(),
            ..Default::default()
        });
        let args = converter.encode_args(Path::new("/m/a.wav"), Path::new("/m/a.mp3.part"));
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "192k"));
        assert_eq!(args.last().map(String::as_str), Some("/m/a.mp3.part"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_conversion_error() {
        let converter = FfmpegConverter {
            ffmpeg: "definitely-not-ffmpeg-xyz".to_string(),
            ffprobe: "definitely-not-ffprobe-xyz".to_string(),
            bitrate: "320k".to_string(),
        };
        let result = converter
            .convert_to_mp3(Path::new("/m/a.wav"), Path::new("/m/a.mp3"))
            .await;
        assert!(matches!(result, Err(Error::Conversion { .. })));
    }
}
