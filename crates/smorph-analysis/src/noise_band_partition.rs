//! Mel-scaled partition of a noise spectrum into bands.
//!
//! The spectrum is stored interleaved (`re, im` per bin), so every even index
//! `d` starts one bin pair at frequency `mix_freq / 2 * d / n_spectrum_bins`.
//! Band `b` covers the mel range `30 + 4000 / n_bands * [b, b + 1)`.
//! Bins below the lowest band stay unassigned.

use rand::Rng;
use smorph_core::math::idb_to_factor;

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

/// Assignment of spectrum bin pairs to noise bands.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseBandPartition {
    band_count: Vec<usize>,
    band_start: Vec<usize>,
    band_from_d: Vec<Option<usize>>,
}

impl NoiseBandPartition {
    /// Create a partition.
    ///
    /// # Arguments
    /// * `n_bands` - Number of noise bands
    /// * `n_spectrum_bins` - Length of the interleaved spectrum
    /// * `mix_freq` - Sample rate in Hz
    pub fn new(n_bands: usize, n_spectrum_bins: usize, mix_freq: f64) -> Self {
        let mut band_count = vec![0; n_bands];
        let mut band_start = vec![0; n_bands];
        let mut band_from_d = vec![None; n_spectrum_bins];

        let bin_freq = |d: usize| mix_freq / 2.0 * d as f64 / n_spectrum_bins as f64;

        let mut d = 0;
        for band in 0..n_bands {
            let mel_low = 30.0 + 4000.0 / n_bands as f64 * band as f64;
            let mel_high = 30.0 + 4000.0 / n_bands as f64 * (band + 1) as f64;
            let hz_low = mel_to_hz(mel_low);
            let hz_high = mel_to_hz(mel_high);

            if band == 0 {
                while d < n_spectrum_bins && bin_freq(d) < hz_low {
                    d += 2;
                }
            }

            band_start[band] = d.min(n_spectrum_bins);
            while d < n_spectrum_bins && bin_freq(d) < hz_high {
                band_from_d[d] = Some(band);
                if d + 1 < n_spectrum_bins {
                    band_from_d[d + 1] = Some(band);
                }
                band_count[band] += 1;
                d += 2;
            }
        }

        Self {
            band_count,
            band_start,
            band_from_d,
        }
    }

    pub fn n_bands(&self) -> usize {
        self.band_count.len()
    }

    pub fn n_spectrum_bins(&self) -> usize {
        self.band_from_d.len()
    }

    /// Number of bin pairs assigned to `band`.
    pub fn bins_per_band(&self, band: usize) -> usize {
        self.band_count[band]
    }

    /// Spectrum index of the first bin pair of `band`.
    ///
    /// The band occupies `band_start(b)..band_start(b) + 2 * bins_per_band(b)`.
    pub fn band_start(&self, band: usize) -> usize {
        self.band_start[band]
    }

    /// Band of spectrum index `d`, `None` if unassigned or out of range.
    pub fn band_of(&self, d: usize) -> Option<usize> {
        self.band_from_d.get(d).copied().flatten()
    }

    /// Expand a per-band noise envelope (idb) into an interleaved spectrum.
    ///
    /// Every assigned bin pair gets magnitude `idb_to_factor(envelope[b]) * scale`
    /// with a random phase drawn from `rng`; unassigned pairs are zeroed. The
    /// same rng state always produces the same spectrum.
    pub fn noise_envelope_to_spectrum<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        envelope: &[u16],
        spectrum: &mut [f32],
        scale: f64,
    ) {
        assert_eq!(envelope.len(), self.n_bands(), "envelope/band count mismatch");
        assert_eq!(
            spectrum.len(),
            self.n_spectrum_bins(),
            "spectrum/bin count mismatch"
        );

        let band_value: Vec<f64> = envelope
            .iter()
            .map(|&idb| idb_to_factor(idb) * scale)
            .collect();

        for d in (0..spectrum.len()).step_by(2) {
            let (re, im) = match self.band_from_d[d] {
                Some(band) => {
                    let phase = rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
                    let value = band_value[band];
                    (value * phase.sin(), value * phase.cos())
                }
                None => (0.0, 0.0),
            };
            spectrum[d] = re as f32;
            if d + 1 < spectrum.len() {
                spectrum[d + 1] = im as f32;
            }
        }
    }
}
