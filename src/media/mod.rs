//! Black-box media collaborators: lossless to mp3 conversion and waveform
//! extraction.
//!
//! The library engine only talks to the traits here, so tests can swap in
//! fakes that never touch ffmpeg or decode audio.

mod ffmpeg;
mod waveform;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use ffmpeg::FfmpegConverter;
pub use waveform::{SymphoniaWaveform, reduce_peaks};

/// Converts lossless sources into the canonical mp3 and probes durations.
#[async_trait]
pub trait AudioConverter: Send + Sync {
    /// Encode `source` into an mp3 at `target`, replacing any existing file.
    async fn convert_to_mp3(&self, source: &Path, target: &Path) -> Result<()>;

    /// Duration in seconds, if the file can be probed.
    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>>;
}

/// Produces a fixed number of normalized peaks (0.0 to 1.0) for a file.
#[async_trait]
pub trait WaveformGenerator: Send + Sync {
    async fn generate(&self, path: &Path) -> Result<Vec<f32>>;
}
