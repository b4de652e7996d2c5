//! Waveform peak extraction using symphonia.

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::WaveformGenerator;
use crate::error::{Error, Result};

/// Frames folded into one intermediate maximum while decoding.
const WINDOW_FRAMES: usize = 1024;

/// Decodes a file and reduces it to `peaks` normalized amplitude values.
#[derive(Debug, Clone)]
pub struct SymphoniaWaveform {
    peaks: usize,
}

impl SymphoniaWaveform {
    pub fn new(peaks: usize) -> Self {
        Self {
            peaks: peaks.max(1),
        }
    }
}

impl Default for SymphoniaWaveform {
    fn default() -> Self {
        Self::new(200)
    }
}

#[async_trait]
impl WaveformGenerator for SymphoniaWaveform {
    async fn generate(&self, path: &Path) -> Result<Vec<f32>> {
        let path: PathBuf = path.to_path_buf();
        let peaks = self.peaks;
        tokio::task::spawn_blocking(move || {
            let windows = window_maxima(&path)?;
            Ok(reduce_peaks(&windows, peaks))
        })
        .await
        .map_err(|e| Error::TaskPanicked(e.to_string()))?
    }
}

/// Decode the whole file, keeping the maximum absolute sample per window.
fn window_maxima(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::waveform(path, e.to_string()))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::waveform(path, "No audio track found"))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::waveform(path, e.to_string()))?;

    let mut maxima = Vec::new();
    let mut current = 0.0f32;
    let mut filled = 0usize;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(Error::waveform(path, e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(Error::waveform(path, e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);

        for frame in buf.samples().chunks(channels) {
            let amplitude = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            current = current.max(amplitude);
            filled += 1;
            if filled == WINDOW_FRAMES {
                maxima.push(current);
                current = 0.0;
                filled = 0;
            }
        }
    }

    if filled > 0 {
        maxima.push(current);
    }
    if maxima.is_empty() {
        return Err(Error::waveform(path, "No audio decoded"));
    }
    Ok(maxima)
}

/// Reduce amplitudes to exactly `count` peaks scaled so the loudest is 1.0.
///
/// Shorter inputs are stretched by repeating values. Silence yields zeros.
pub fn reduce_peaks(amplitudes: &[f32], count: usize) -> Vec<f32> {
    if amplitudes.is_empty() || count == 0 {
        return vec![0.0; count];
    }

    let len = amplitudes.len();
    let mut peaks: Vec<f32> = (0..count)
        .map(|i| {
            let start = i * len / count;
            let end = ((i + 1) * len / count).max(start + 1).min(len);
            amplitudes[start.min(len - 1)..end]
                .iter()
                .fold(0.0f32, |m, a| m.max(a.abs()))
        })
        .collect();

    let max = peaks.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for p in &mut peaks {
            *p /= max;
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_peaks_normalizes() {
        let peaks = reduce_peaks(&[0.1, 0.5, 0.25, 0.2], 2);
        assert_eq!(peaks, vec![1.0, 0.5]);
    }

    #[test]
    fn test_reduce_peaks_stretches_short_input() {
        let peaks = reduce_peaks(&[0.5], 4);
        assert_eq!(peaks, vec![1.0; 4]);
    }

    #[test]
    fn test_reduce_peaks_silence() {
        assert_eq!(reduce_peaks(&[0.0, 0.0, 0.0], 2), vec![0.0, 0.0]);
        assert_eq!(reduce_peaks(&[], 3), vec![0.0; 3]);
    }

    #[tokio::test]
    async fn test_generate_missing_file_fails() {
        let result = SymphoniaWaveform::default()
            .generate(Path::new("/nonexistent/file.wav"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_generate_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 4000);

        let peaks = SymphoniaWaveform::new(10).generate(&path).await.unwrap();
        assert_eq!(peaks.len(), 10);
        assert!(peaks.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(peaks.iter().any(|p| *p == 1.0));
    }

    /// Minimal 16-bit mono PCM wav with a ramp signal.
    fn write_test_wav(path: &Path, sample_rate: u32, frames: u32) {
        let data_len = frames * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            let sample = ((i % 100) as i16 - 50) * 300;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn peaks_have_requested_length_and_range(
            amps in prop::collection::vec(-1.0f32..1.0, 0..500),
            count in 1usize..300,
        ) {
            let peaks = reduce_peaks(&amps, count);
            prop_assert_eq!(peaks.len(), count);
            prop_assert!(peaks.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }
}
