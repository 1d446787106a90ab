//! Short-time sine + noise analysis.
//!
//! ## Algorithm
//!
//! 1. **STFT** - windowed, zero padded FFT of frames `frame_step` apart
//! 2. **Local maxima** - spectral peaks with parabolic interpolation in dB
//! 3. **Partial linking** - peaks of neighbour frames within 5% frequency are
//!    linked; weak isolated peaks are dropped (optimization level >= 1)
//! 4. **Spectral subtraction** - the main lobe of each sine is removed
//! 5. **Noise envelope** - RMS of the residual per mel band
//! 6. **Attack** - frames where the energy crosses 10% and 90% of its peak

use crate::error::{Error, Result};
use crate::noise_band_partition::NoiseBandPartition;
use rustfft::{num_complex::Complex, FftPlanner};
use smorph_core::math::{
    db_from_factor, db_to_factor, factor_to_idb, freq_to_ifreq, phase_to_iphase,
};
use smorph_core::{Audio, AudioBlock, CancelToken, EncoderConfig, LoopType, WavData};
use tracing::warn;

/// Number of noise bands in encoded frames.
pub const NOISE_BANDS: usize = 32;

/// Parameter names understood in encoder config entries.
pub const KNOWN_PARAMS: [&str; 2] = ["min-frame-periods", "min-frame-size"];

const PEAK_THRESHOLD_DB: f64 = -90.0;
const WEAK_PEAK_DB: f64 = -60.0;
const MIN_PEAK_FREQ: f64 = 10.0;
const LINK_FREQ_TOLERANCE: f64 = 0.05;

/// Frame geometry and settings for one encoder run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderParams {
    /// Sample rate of the input.
    pub mix_freq: f64,
    /// FFT zero padding factor.
    pub zeropad: usize,
    /// Fundamental of the encoded note in Hz.
    pub fundamental_freq: f64,
    pub frame_size_ms: f64,
    pub frame_step_ms: f64,
    /// Analysis frame length in samples.
    pub frame_size: usize,
    /// Frame step in samples.
    pub frame_step: usize,
    /// Smallest power of two >= `frame_size`.
    pub block_size: usize,
    /// Store the phase of each sine at the frame center.
    pub enable_phases: bool,
    /// `(param, value)` overrides.
    pub config: Vec<(String, String)>,
}

impl EncoderParams {
    /// Take the active entries of an encoder config as overrides.
    pub fn set_config(&mut self, cfg: &EncoderConfig) {
        self.config = cfg
            .active_entries()
            .iter()
            .map(|e| (e.param.clone(), e.value.clone()))
            .collect();
    }

    /// Numeric value of an override; malformed values are reported and ignored.
    pub fn get_param(&self, name: &str) -> Option<f64> {
        let (_, value) = self.config.iter().rev().find(|(param, _)| param == name)?;
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                warn!("encoder config: bad value '{}' for '{}' ignored", value, name);
                None
            }
        }
    }

    /// Report (and return) override names the encoder doesn't know.
    pub fn check_unknown_params(&self) -> Vec<String> {
        let unknown: Vec<String> = self
            .config
            .iter()
            .filter(|(param, _)| !KNOWN_PARAMS.contains(&param.as_str()))
            .map(|(param, _)| param.clone())
            .collect();
        for param in &unknown {
            warn!("encoder config: unsupported parameter '{}' ignored", param);
        }
        unknown
    }
}

#[derive(Debug, Clone)]
struct Peak {
    /// Position in padded FFT bins.
    bin: f64,
    freq: f64,
    mag: f64,
    mag_db: f64,
    /// Radians at the frame center.
    phase: f64,
    has_prev: bool,
    has_next: bool,
}

#[derive(Debug, Default)]
struct Frame {
    spectrum: Vec<Complex<f32>>,
    debug_samples: Vec<f32>,
    peaks: Vec<Peak>,
    noise: Vec<u16>,
    energy: f64,
}

/// Encoder producing [`Audio`] from sample data.
pub struct Encoder {
    params: EncoderParams,
    frames: Vec<Frame>,
    window_norm: f64,
    original_samples: Vec<f32>,
    attack_start_ms: f64,
    attack_end_ms: f64,
    /// Zero values prepended so the first frame is centered on the first sample.
    pub zero_values_at_start: usize,
    /// Number of input samples encoded.
    pub sample_count: usize,
}

impl Encoder {
    pub fn new(params: EncoderParams) -> Self {
        Self {
            params,
            frames: Vec::new(),
            window_norm: 1.0,
            original_samples: Vec::new(),
            attack_start_ms: 0.0,
            attack_end_ms: 0.0,
            zero_values_at_start: 0,
            sample_count: 0,
        }
    }

    pub fn params(&self) -> &EncoderParams {
        &self.params
    }

    /// Number of analysis frames produced by the last run.
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Run all analysis steps.
    ///
    /// # Arguments
    /// * `wav_data` - Input samples
    /// * `channel` - Channel to encode
    /// * `window` - Analysis window, `block_size` long
    /// * `optimization_level` - 0: raw peaks, >= 1: link and validate partials
    /// * `attack` - Estimate attack start/end
    /// * `sines` - Search sine partials (noise only otherwise)
    /// * `cancel` - Checked once per frame and between steps
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        wav_data: &WavData,
        channel: usize,
        window: &[f32],
        optimization_level: u32,
        attack: bool,
        sines: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.validate(wav_data, channel, window)?;

        let n_channels = usize::from(wav_data.n_channels());
        self.original_samples = wav_data
            .samples()
            .iter()
            .skip(channel)
            .step_by(n_channels)
            .copied()
            .collect();
        self.sample_count = self.original_samples.len();

        self.compute_stft(window, cancel)?;

        if sines {
            self.search_local_maxima(cancel)?;
            if optimization_level >= 1 {
                self.link_partials();
                self.validate_partials();
            }
        }
        check(cancel)?;

        self.approx_noise(cancel)?;

        if attack {
            self.compute_attack_params();
        }
        Ok(())
    }

    fn validate(&self, wav_data: &WavData, channel: usize, window: &[f32]) -> Result<()> {
        let p = &self.params;
        if p.mix_freq <= 0.0 || p.fundamental_freq <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "mix_freq {} / fundamental {} must be positive",
                p.mix_freq, p.fundamental_freq
            )));
        }
        if p.frame_size < 2 || p.frame_step == 0 || p.zeropad == 0 {
            return Err(Error::InvalidInput(format!(
                "bad frame geometry: size {} step {} zeropad {}",
                p.frame_size, p.frame_step, p.zeropad
            )));
        }
        if p.block_size < p.frame_size || window.len() != p.block_size {
            return Err(Error::InvalidInput(format!(
                "block size {} / window length {} don't fit frame size {}",
                p.block_size,
                window.len(),
                p.frame_size
            )));
        }
        if channel >= usize::from(wav_data.n_channels()) {
            return Err(Error::InvalidInput(format!(
                "channel {} out of range ({} channels)",
                channel,
                wav_data.n_channels()
            )));
        }
        Ok(())
    }

    fn compute_stft(&mut self, window: &[f32], cancel: &CancelToken) -> Result<()> {
        let block_size = self.params.block_size;
        let frame_step = self.params.frame_step;
        let fft_size = block_size * self.params.zeropad;

        self.zero_values_at_start = self.params.frame_size / 2;
        self.window_norm = window.iter().map(|&w| f64::from(w)).sum::<f64>() / 2.0;
        if self.window_norm <= 0.0 {
            return Err(Error::InvalidInput("window is all zero".to_string()));
        }

        let content_len = self.zero_values_at_start + self.original_samples.len();
        let mut padded = vec![0.0f32; content_len + block_size];
        padded[self.zero_values_at_start..content_len].copy_from_slice(&self.original_samples);

        let n_frames = content_len.div_ceil(frame_step);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        self.frames = Vec::with_capacity(n_frames);
        for n in 0..n_frames {
            check(cancel)?;

            let pos = n * frame_step;
            let debug_samples: Vec<f32> = padded[pos..pos + block_size]
                .iter()
                .zip(window)
                .map(|(s, w)| s * w)
                .collect();

            let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
            for (b, &s) in buffer.iter_mut().zip(&debug_samples) {
                b.re = s;
            }
            fft.process(&mut buffer);
            buffer.truncate(fft_size / 2 + 1);

            self.frames.push(Frame {
                spectrum: buffer,
                debug_samples,
                ..Default::default()
            });
        }
        Ok(())
    }

    fn search_local_maxima(&mut self, cancel: &CancelToken) -> Result<()> {
        let fft_size = (self.params.block_size * self.params.zeropad) as f64;
        let min_peak_width = 3 * self.params.zeropad;
        let center = (self.params.frame_size - 1) as f64 / 2.0;
        let mix_freq = self.params.mix_freq;
        let window_norm = self.window_norm;

        let max_mag = self
            .frames
            .iter()
            .flat_map(|f| f.spectrum.iter().skip(1))
            .map(|c| f64::from(c.norm()))
            .fold(0.0, f64::max);
        if max_mag <= 0.0 {
            return Ok(());
        }

        for frame in &mut self.frames {
            check(cancel)?;

            let mags: Vec<f64> = frame.spectrum.iter().map(|c| f64::from(c.norm())).collect();
            let db = |k: usize| db_from_factor(mags[k] / max_mag, -100.0);

            for k in 1..mags.len().saturating_sub(1) {
                if !(mags[k] > mags[k - 1] && mags[k] > mags[k + 1]) {
                    continue;
                }
                let mag2 = db(k);
                if mag2 <= PEAK_THRESHOLD_DB {
                    continue;
                }

                // extent of the monotonic slopes around the peak; narrow ones are side lobes
                let mut ds = k - 1;
                while ds > 0 && mags[ds] < mags[ds + 1] {
                    ds -= 1;
                }
                let mut de = k + 1;
                while de < mags.len() - 1 && mags[de] > mags[de + 1] {
                    de += 1;
                }
                if de - ds <= min_peak_width {
                    continue;
                }

                let (mag1, mag3) = (db(k - 1), db(k + 1));
                let a = (mag1 + mag3 - 2.0 * mag2) / 2.0;
                let b = mag3 - mag2 - a;
                let x_max = if a < 0.0 { (-b / (2.0 * a)).clamp(-1.0, 1.0) } else { 0.0 };
                let peak_db = a * x_max * x_max + b * x_max + mag2;

                let bin = k as f64 + x_max;
                let freq = bin * mix_freq / fft_size;
                if freq <= MIN_PEAK_FREQ {
                    continue;
                }
                frame.peaks.push(Peak {
                    bin,
                    freq,
                    mag: db_to_factor(peak_db) * max_mag / window_norm,
                    mag_db: peak_db,
                    phase: f64::from(frame.spectrum[k].arg())
                        + 2.0 * std::f64::consts::PI * k as f64 * center / fft_size,
                    has_prev: false,
                    has_next: false,
                });
            }
        }
        Ok(())
    }

    /// Greedily link peaks of adjacent frames, strongest pairs first.
    fn link_partials(&mut self) {
        for n in 0..self.frames.len().saturating_sub(1) {
            let (head, tail) = self.frames.split_at_mut(n + 1);
            let current = &mut head[n].peaks;
            let next = &mut tail[0].peaks;

            let mut pairs = Vec::new();
            for (i, p) in current.iter().enumerate() {
                for (j, q) in next.iter().enumerate() {
                    if (p.freq - q.freq).abs() / p.freq < LINK_FREQ_TOLERANCE {
                        pairs.push((p.mag_db + q.mag_db, i, j));
                    }
                }
            }
            pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

            for (_, i, j) in pairs {
                if !current[i].has_next && !next[j].has_prev {
                    current[i].has_next = true;
                    next[j].has_prev = true;
                }
            }
        }
    }

    fn validate_partials(&mut self) {
        for frame in &mut self.frames {
            frame
                .peaks
                .retain(|p| p.has_prev || p.has_next || p.mag_db > WEAK_PEAK_DB);
        }
    }

    /// Remove sine main lobes and summarize the residual per noise band.
    fn approx_noise(&mut self, cancel: &CancelToken) -> Result<()> {
        let block_size = self.params.block_size;
        let zeropad = self.params.zeropad;
        let partition = NoiseBandPartition::new(NOISE_BANDS, block_size, self.params.mix_freq);

        // main lobe half width of the frame window, in padded bins
        let lobe = 2.0 * zeropad as f64 * block_size as f64 / self.params.frame_size as f64;

        for frame in &mut self.frames {
            check(cancel)?;

            let mut band_power = vec![0.0f64; NOISE_BANDS];
            let mut energy = 0.0;
            for k in 0..block_size / 2 {
                let kp = k * zeropad;
                let mag = f64::from(frame.spectrum[kp].norm()) / self.window_norm;
                energy += mag * mag;

                let in_sine = frame.peaks.iter().any(|p| (kp as f64 - p.bin).abs() < lobe);
                if in_sine {
                    continue;
                }
                if let Some(band) = partition.band_of(2 * k) {
                    band_power[band] += mag * mag;
                }
            }

            frame.energy = energy;
            frame.noise = band_power
                .iter()
                .enumerate()
                .map(|(b, &power)| match partition.bins_per_band(b) {
                    0 => 0,
                    count => factor_to_idb((power / count as f64).sqrt()),
                })
                .collect();
        }
        Ok(())
    }

    fn compute_attack_params(&mut self) {
        let peak = self.frames.iter().map(|f| f.energy).fold(0.0, f64::max);
        if peak <= 0.0 {
            self.attack_start_ms = 0.0;
            self.attack_end_ms = 0.0;
            return;
        }
        let first_above = |level: f64| {
            self.frames
                .iter()
                .position(|f| f.energy >= level * peak)
                .unwrap_or(0)
        };
        let (start, end) = (first_above(0.1), first_above(0.9));
        self.attack_start_ms = start as f64 * self.params.frame_step_ms;
        self.attack_end_ms = end as f64 * self.params.frame_step_ms;
    }

    /// Quantize the analysis into an [`Audio`], including debug data.
    pub fn save_as_audio(&self) -> Audio {
        let fundamental = self.params.fundamental_freq;
        let contents = self
            .frames
            .iter()
            .map(|frame| {
                let mut block = AudioBlock {
                    mags: frame.peaks.iter().map(|p| factor_to_idb(p.mag)).collect(),
                    freqs: frame
                        .peaks
                        .iter()
                        .map(|p| freq_to_ifreq(p.freq / fundamental))
                        .collect(),
                    phases: if self.params.enable_phases {
                        frame.peaks.iter().map(|p| phase_to_iphase(p.phase)).collect()
                    } else {
                        Vec::new()
                    },
                    noise: frame.noise.clone(),
                    original_fft: frame.spectrum.iter().map(|c| c.norm()).collect(),
                    debug_samples: frame.debug_samples.clone(),
                };
                block.sort_freqs();
                block
            })
            .collect();

        Audio {
            fundamental_freq: fundamental as f32,
            mix_freq: self.params.mix_freq as f32,
            frame_size_ms: self.params.frame_size_ms as f32,
            frame_step_ms: self.params.frame_step_ms as f32,
            attack_start_ms: self.attack_start_ms as f32,
            attack_end_ms: self.attack_end_ms as f32,
            zeropad: self.params.zeropad as u32,
            loop_type: LoopType::None,
            loop_start: 0,
            loop_end: 0,
            zero_values_at_start: self.zero_values_at_start as u32,
            sample_count: self.sample_count as u32,
            original_samples: self.original_samples.clone(),
            original_samples_norm_db: 0.0,
            contents,
        }
    }
}

fn check(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
