//! Post-processing of encoded [`Audio`]: energy, volume normalization and
//! pitch correction.

use crate::noise_band_partition::NoiseBandPartition;
use smorph_core::math::{db_from_factor, db_to_factor, factor_to_delta_idb, freq_to_ifreq};
use smorph_core::{Audio, AudioBlock};
use tracing::warn;

/// Energy normalization target of [`normalize_energy`].
pub const TARGET_ENERGY: f64 = 0.05;

const ENERGY_BANDS: usize = 32;
const ENERGY_BINS: usize = 4096;
/// Reference rate of [`compute_energy`]; volume levels don't depend on the
/// sample rate of the recording.
const ENERGY_MIX_FREQ: f64 = 48000.0;

/// Per-frame energy estimate: half the squared sine magnitudes plus the noise
/// power weighted by band width.
#[derive(Debug, Clone)]
pub struct Block2Energy {
    noise_factors: Vec<f64>,
}

impl Block2Energy {
    pub fn new(mix_freq: f64) -> Self {
        let partition = NoiseBandPartition::new(ENERGY_BANDS, ENERGY_BINS, mix_freq);
        let noise_factors = (0..ENERGY_BANDS)
            .map(|b| mix_freq * partition.bins_per_band(b) as f64 / ENERGY_BINS as f64)
            .collect();
        Self { noise_factors }
    }

    pub fn energy(&self, block: &AudioBlock) -> f64 {
        if block.noise.len() != self.noise_factors.len() {
            warn!(
                "energy: expected {} noise bands, got {}",
                self.noise_factors.len(),
                block.noise.len()
            );
            return 0.0;
        }

        let sines: f64 = (0..block.mags.len())
            .map(|i| 0.5 * block.mags_f(i) * block.mags_f(i))
            .sum();
        let noise: f64 = self
            .noise_factors
            .iter()
            .enumerate()
            .map(|(i, factor)| block.noise_f(i) * block.noise_f(i) * factor)
            .sum();
        sines + noise
    }
}

/// Average frame energy; frame loops only count `loop_start..=loop_end`.
///
/// Noise bands are weighted for a 48 kHz rate whatever `audio.mix_freq` is.
pub fn compute_energy(audio: &Audio) -> f64 {
    let len = audio.contents.len();
    let (start, end) = if audio.loop_type.is_frame_loop() {
        let start = audio.loop_start.clamp(0, len as i32) as usize;
        let end = (audio.loop_end + 1).clamp(start as i32, len as i32) as usize;
        (start, end)
    } else {
        (0, len)
    };
    if start >= end {
        return 0.0;
    }

    let block2energy = Block2Energy::new(ENERGY_MIX_FREQ);
    let total: f64 = audio.contents[start..end]
        .iter()
        .map(|b| block2energy.energy(b))
        .sum();
    total / (end - start) as f64
}

/// Scale all sine and noise magnitudes by `norm`.
pub fn normalize_factor(norm: f64, audio: &mut Audio) {
    let delta = factor_to_delta_idb(norm);
    let shift = |v: &mut u16| *v = (i32::from(*v) + delta).clamp(0, 65535) as u16;

    for block in &mut audio.contents {
        block.mags.iter_mut().for_each(shift);
        block.noise.iter_mut().for_each(shift);
    }

    let samples_factor = db_to_factor(audio.original_samples_norm_db);
    audio.original_samples_norm_db = db_from_factor(samples_factor * norm, -200.0);
}

/// Scale so that an audio of the given `energy` ends up at [`TARGET_ENERGY`].
pub fn normalize_energy(energy: f64, audio: &mut Audio) {
    if energy <= 0.0 {
        return;
    }
    normalize_factor((TARGET_ENERGY / energy).sqrt(), audio);
}

/// Factor that moves the magnitude weighted fundamental of the 40%-60% region
/// to 1.0. `None` if no partial near the fundamental exists there.
pub fn get_auto_tune_factor(audio: &Audio) -> Option<f64> {
    let len = audio.contents.len();
    let mut freq_sum = 0.0;
    let mut mag_sum = 0.0;

    for (f, block) in audio.contents.iter().enumerate() {
        let position_percent = f as f64 * 100.0 / len as f64;
        if !(40.0..=60.0).contains(&position_percent) {
            continue;
        }
        let mut est = FundamentalEst::default();
        for i in 0..block.freqs.len() {
            est.add_partial(block.freqs_f(i), block.mags_f(i));
        }
        if est.best_mag[1] > 0.0 {
            freq_sum += est.best_freq[1] * est.best_mag[1];
            mag_sum += est.best_mag[1];
        }
    }

    (mag_sum > 0.0).then(|| mag_sum / freq_sum)
}

/// Multiply every partial frequency of `block` by `tune_factor`.
pub fn apply_auto_tune_factor_block(block: &mut AudioBlock, tune_factor: f64) {
    for i in 0..block.freqs.len() {
        block.freqs[i] = freq_to_ifreq(block.freqs_f(i) * tune_factor);
    }
}

pub fn apply_auto_tune_factor(audio: &mut Audio, tune_factor: f64) {
    for block in &mut audio.contents {
        apply_auto_tune_factor_block(block, tune_factor);
    }
}

/// Tune each frame relative to the moving average of the estimated
/// fundamental.
///
/// # Arguments
/// * `partials` - Partials used by [`estimate_fundamental`]
/// * `smooth_ms` - Width of the averaging window
/// * `smooth_percent` - Share of the deviation from the average that is kept;
///   0 tunes every frame to 1.0
pub fn auto_tune_smooth(audio: &mut Audio, partials: i32, smooth_ms: f64, smooth_percent: f64) {
    let freqs: Vec<f64> = audio
        .contents
        .iter()
        .map(|b| estimate_fundamental(b, partials))
        .collect();
    let step_ms = f64::from(audio.frame_step_ms);
    let interp = smooth_percent / 100.0;

    for (f, block) in audio.contents.iter_mut().enumerate() {
        let window: Vec<f64> = freqs
            .iter()
            .enumerate()
            .filter(|(j, _)| step_ms * (f as f64 - *j as f64).abs() < smooth_ms)
            .map(|(_, &freq)| freq)
            .collect();
        if window.is_empty() {
            continue;
        }
        let smooth_freq = window.iter().sum::<f64>() / window.len() as f64;
        let dest_freq = (freqs[f] / smooth_freq - 1.0) * interp + 1.0;
        apply_auto_tune_factor_block(block, dest_freq / freqs[f]);
    }
}

/// Fundamental estimate from the strongest partial near each of the first
/// three harmonics.
#[derive(Debug, Clone, Default)]
pub struct FundamentalEst {
    best_freq: [f64; 4],
    best_mag: [f64; 4],
}

impl FundamentalEst {
    const RANGES: [(usize, f64, f64); 3] = [(1, 0.8, 1.25), (2, 1.5, 2.5), (3, 2.5, 3.5)];

    pub fn add_partial(&mut self, freq: f64, mag: f64) {
        for (n, freq_min, freq_max) in Self::RANGES {
            if freq > freq_min && freq < freq_max && mag > self.best_mag[n] {
                self.best_freq[n] = freq / n as f64;
                self.best_mag[n] = mag;
            }
        }
    }

    /// Weighted fundamental of the first `n_partials` (1..=3) harmonics, 1.0
    /// if none was seen.
    pub fn fundamental(&self, n_partials: i32) -> f64 {
        if !(1..=3).contains(&n_partials) {
            warn!("fundamental: partials {} out of range 1..=3", n_partials);
            return 1.0;
        }
        let n = n_partials as usize;
        let fsum: f64 = (1..=n).map(|i| self.best_freq[i] * self.best_mag[i]).sum();
        let msum: f64 = (1..=n).map(|i| self.best_mag[i]).sum();
        if msum > 0.0 {
            fsum / msum
        } else {
            1.0
        }
    }
}

pub fn estimate_fundamental(block: &AudioBlock, partials: i32) -> f64 {
    let mut est = FundamentalEst::default();
    for i in 0..block.freqs.len() {
        est.add_partial(block.freqs_f(i), block.mags_f(i));
    }
    est.fundamental(partials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use smorph_core::math::factor_to_idb;
    use smorph_core::LoopType;

    fn block(partials: &[(f64, f64)], noise: u16) -> AudioBlock {
        let mut block = AudioBlock {
            freqs: partials.iter().map(|p| freq_to_ifreq(p.0)).collect(),
            mags: partials.iter().map(|p| factor_to_idb(p.1)).collect(),
            noise: vec![noise; 32],
            ..Default::default()
        };
        block.sort_freqs();
        block
    }

    fn audio(blocks: Vec<AudioBlock>) -> Audio {
        Audio {
            mix_freq: 48000.0,
            frame_step_ms: 10.0,
            contents: blocks,
            ..Default::default()
        }
    }

    #[test]
    fn test_sine_energy() {
        let e = Block2Energy::new(48000.0);
        let b = block(&[(1.0, 0.5)], 0);
        assert_relative_eq!(e.energy(&b), 0.125, epsilon = 1e-3);
    }

    #[test]
    fn test_energy_band_mismatch() {
        let e = Block2Energy::new(48000.0);
        let mut b = block(&[(1.0, 0.5)], 0);
        b.noise.truncate(3);
        assert_eq!(e.energy(&b), 0.0);
    }

    #[test]
    fn test_compute_energy_loop_region() {
        let mut a = audio(vec![
            block(&[(1.0, 1.0)], 0),
            block(&[(1.0, 0.5)], 0),
            block(&[(1.0, 0.5)], 0),
            block(&[(1.0, 1.0)], 0),
        ]);
        a.loop_type = LoopType::FrameForward;
        a.loop_start = 1;
        a.loop_end = 2;
        assert_relative_eq!(compute_energy(&a), 0.125, epsilon = 1e-3);

        a.loop_type = LoopType::None;
        assert_relative_eq!(compute_energy(&a), (0.5 + 0.125) / 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_compute_energy_ignores_sample_rate() {
        let noisy = |mix_freq: f32| Audio {
            mix_freq,
            ..audio(vec![block(&[(1.0, 0.5)], factor_to_idb(0.01)); 4])
        };
        let reference = compute_energy(&noisy(48000.0));
        assert!(reference > 0.125);
        assert_eq!(compute_energy(&noisy(44100.0)), reference);
        assert_eq!(compute_energy(&noisy(0.0)), reference);
    }

    #[test]
    fn test_compute_energy_empty() {
        assert_eq!(compute_energy(&Audio::default()), 0.0);

        let mut a = audio(vec![block(&[(1.0, 1.0)], 0)]);
        a.loop_type = LoopType::FramePingPong;
        a.loop_start = 5;
        a.loop_end = 7;
        assert_eq!(compute_energy(&a), 0.0);
    }

    #[test]
    fn test_normalize_factor() {
        let mut a = audio(vec![block(&[(1.0, 0.5)], 20000)]);
        let before = a.contents[0].clone();
        normalize_factor(db_to_factor(-6.0), &mut a);

        assert_eq!(i32::from(a.contents[0].mags[0]), i32::from(before.mags[0]) - 384);
        assert!(a.contents[0].noise.iter().all(|&n| n == 20000 - 384));
        assert_relative_eq!(a.original_samples_norm_db, -6.0, epsilon = 1e-2);
    }

    #[test]
    fn test_normalize_factor_clamps() {
        let mut a = audio(vec![block(&[], 100)]);
        normalize_factor(db_to_factor(-10.0), &mut a);
        assert!(a.contents[0].noise.iter().all(|&n| n == 0));
    }

    #[test]
    fn test_normalize_energy_reaches_target() {
        let mut a = audio(vec![block(&[(1.0, 0.1)], 0), block(&[(1.0, 0.3)], 0)]);
        normalize_energy(compute_energy(&a), &mut a);
        assert_relative_eq!(compute_energy(&a), TARGET_ENERGY, epsilon = 1e-3);
    }

    #[test]
    fn test_normalize_energy_ignores_silence() {
        let mut a = audio(vec![block(&[(1.0, 0.1)], 0)]);
        let before = a.clone();
        normalize_energy(0.0, &mut a);
        assert_eq!(a, before);
    }

    #[test]
    fn test_auto_tune_factor() {
        let blocks = (0..10).map(|_| block(&[(1.02, 0.5), (2.04, 0.2)], 0)).collect();
        let a = audio(blocks);
        let factor = get_auto_tune_factor(&a).unwrap();
        assert_relative_eq!(factor, 1.0 / 1.02, epsilon = 1e-3);
    }

    #[test]
    fn test_auto_tune_factor_without_fundamental() {
        let blocks = (0..10).map(|_| block(&[(3.0, 0.5)], 0)).collect();
        assert_eq!(get_auto_tune_factor(&audio(blocks)), None);
        assert_eq!(get_auto_tune_factor(&Audio::default()), None);
    }

    #[test]
    fn test_apply_auto_tune_factor() {
        let mut a = audio(vec![block(&[(1.02, 0.5), (2.04, 0.2)], 0)]);
        apply_auto_tune_factor(&mut a, 1.0 / 1.02);
        assert_relative_eq!(a.contents[0].freqs_f(0), 1.0, epsilon = 1e-3);
        assert_relative_eq!(a.contents[0].freqs_f(1), 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_fundamental_est() {
        let mut est = FundamentalEst::default();
        assert_eq!(est.fundamental(1), 1.0);

        est.add_partial(1.01, 1.0);
        est.add_partial(2.04, 1.0);
        est.add_partial(0.5, 5.0);
        assert_relative_eq!(est.fundamental(1), 1.01, epsilon = 1e-9);
        assert_relative_eq!(est.fundamental(2), (1.01 + 1.02) / 2.0, epsilon = 1e-9);
        assert_eq!(est.fundamental(4), 1.0);
    }

    #[test]
    fn test_smooth_zero_amount_tunes_every_frame() {
        let blocks = (0..20)
            .map(|i| {
                let f = if i % 2 == 0 { 1.01 } else { 0.97 };
                block(&[(f, 0.5)], 0)
            })
            .collect();
        let mut a = audio(blocks);
        auto_tune_smooth(&mut a, 1, 1000.0, 0.0);
        for b in &a.contents {
            assert_relative_eq!(b.freqs_f(0), 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_smooth_full_amount_keeps_vibrato() {
        // average over the window is 1.0, so the deviation survives unchanged
        let blocks = (0..20)
            .map(|i| {
                let f = if i % 2 == 0 { 1.01 } else { 0.99 };
                block(&[(f, 0.5)], 0)
            })
            .collect();
        let mut a = audio(blocks);
        let before = a.clone();
        auto_tune_smooth(&mut a, 1, 1000.0, 100.0);
        for (x, y) in a.contents.iter().zip(&before.contents) {
            assert_relative_eq!(x.freqs_f(0), y.freqs_f(0), epsilon = 1e-3);
        }
    }
}
