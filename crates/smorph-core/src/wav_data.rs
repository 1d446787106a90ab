//! Decoded PCM sample data.

use crate::error::{Error, Result};
use std::path::Path;

/// Immutable decoded PCM samples (interleaved if multichannel).
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    samples: Vec<f32>,
    n_channels: u16,
    mix_freq: f64,
    bit_depth: u16,
}

impl WavData {
    pub fn new(samples: Vec<f32>, n_channels: u16, mix_freq: f64, bit_depth: u16) -> Self {
        Self {
            samples,
            n_channels: n_channels.max(1),
            mix_freq,
            bit_depth,
        }
    }

    /// Mono 32 bit float data.
    pub fn mono(samples: Vec<f32>, mix_freq: f64) -> Self {
        Self::new(samples, 1, mix_freq, 32)
    }

    /// Load a WAV file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(Error::InvalidWavData(format!(
                        "unsupported bit depth {}",
                        spec.bits_per_sample
                    )));
                }
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f64;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (f64::from(v) * scale) as f32))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        Ok(Self::new(
            samples,
            spec.channels,
            f64::from(spec.sample_rate),
            spec.bits_per_sample,
        ))
    }

    /// Save as 32 bit float WAV file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.n_channels,
            sample_rate: self.mix_freq.round() as u32,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
        for &s in &self.samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
        Ok(())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn n_channels(&self) -> u16 {
        self.n_channels
    }

    pub fn mix_freq(&self) -> f64 {
        self.mix_freq
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    /// Number of sample values (all channels).
    pub fn n_values(&self) -> usize {
        self.samples.len()
    }

    /// Length in milliseconds.
    pub fn length_ms(&self) -> f64 {
        let frames = self.samples.len() / usize::from(self.n_channels);
        1000.0 * frames as f64 / self.mix_freq
    }

    /// Copy of the values in `start..end`, clamped to the available data.
    pub fn clipped(&self, start: usize, end: usize) -> WavData {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        Self {
            samples: self.samples[start..end].to_vec(),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clipped_clamps_range() {
        let wav = WavData::mono(vec![0.0, 0.1, 0.2, 0.3], 48000.0);
        assert_eq!(wav.clipped(1, 3).samples(), &[0.1, 0.2]);
        assert_eq!(wav.clipped(2, 100).samples(), &[0.2, 0.3]);
        assert!(wav.clipped(10, 2).samples().is_empty());
        assert_eq!(wav.clipped(1, 3).mix_freq(), 48000.0);
    }

    #[test]
    fn test_length_ms() {
        let wav = WavData::mono(vec![0.0; 4800], 48000.0);
        assert_relative_eq!(wav.length_ms(), 100.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let wav = WavData::mono(vec![0.0, 0.25, -0.5, 1.0], 44100.0);
        wav.save(&path).unwrap();

        let loaded = WavData::load(&path).unwrap();
        assert_eq!(loaded.n_channels(), 1);
        assert_eq!(loaded.mix_freq(), 44100.0);
        assert_eq!(loaded.samples(), wav.samples());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        assert!(WavData::load("/nonexistent/definitely/missing.wav").is_err());
    }
}
