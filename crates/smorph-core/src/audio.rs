//! Encoded audio: a sequence of quantized short-time spectrum frames.

use crate::math::{idb_to_factor, ifreq_to_freq};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One analysis frame in quantized parametric form.
///
/// `freqs` are relative to the fundamental of the encoded note (1.0 is the
/// fundamental itself). `original_fft` and `debug_samples` are filled by the
/// encoder for inspection and are stripped before results are cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioBlock {
    /// Sine magnitudes (idb).
    pub mags: Vec<u16>,
    /// Sine frequencies relative to the fundamental (ifreq).
    pub freqs: Vec<u16>,
    /// Sine phases (iphase), empty unless phases were encoded.
    pub phases: Vec<u16>,
    /// Noise envelope, one value per noise band (idb).
    pub noise: Vec<u16>,
    /// Zero padded magnitude spectrum of the frame, debugging only.
    pub original_fft: Vec<f32>,
    /// Windowed input samples of the frame, debugging only.
    pub debug_samples: Vec<f32>,
}

impl AudioBlock {
    pub fn mags_f(&self, i: usize) -> f64 {
        idb_to_factor(self.mags[i])
    }

    pub fn freqs_f(&self, i: usize) -> f64 {
        ifreq_to_freq(self.freqs[i])
    }

    pub fn noise_f(&self, i: usize) -> f64 {
        idb_to_factor(self.noise[i])
    }

    /// Sort partials by ascending frequency, keeping mags (and phases, if
    /// present) paired.
    pub fn sort_freqs(&mut self) {
        let with_phases = self.phases.len() == self.freqs.len();
        let mut partials: Vec<(u16, u16, u16)> = (0..self.freqs.len().min(self.mags.len()))
            .map(|i| {
                let phase = if with_phases { self.phases[i] } else { 0 };
                (self.freqs[i], self.mags[i], phase)
            })
            .collect();
        partials.sort_unstable();
        self.freqs = partials.iter().map(|p| p.0).collect();
        self.mags = partials.iter().map(|p| p.1).collect();
        if with_phases {
            self.phases = partials.iter().map(|p| p.2).collect();
        }
    }

    fn mem_size(&self) -> usize {
        2 * (self.mags.len() + self.freqs.len() + self.phases.len() + self.noise.len())
            + 4 * (self.original_fft.len() + self.debug_samples.len())
    }
}

/// How playback loops an encoded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopType {
    #[default]
    None,
    FrameForward,
    FramePingPong,
}

impl LoopType {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopType::None => "loop-none",
            LoopType::FrameForward => "loop-frame-forward",
            LoopType::FramePingPong => "loop-frame-ping-pong",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "loop-none" => Some(LoopType::None),
            "loop-frame-forward" => Some(LoopType::FrameForward),
            "loop-frame-ping-pong" => Some(LoopType::FramePingPong),
            _ => None,
        }
    }

    /// Whether `loop_start..=loop_end` describes a frame range.
    pub fn is_frame_loop(self) -> bool {
        matches!(self, LoopType::FrameForward | LoopType::FramePingPong)
    }
}

impl fmt::Display for LoopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder output for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audio {
    /// Fundamental of the encoded note in Hz.
    pub fundamental_freq: f32,
    /// Sample rate of the source data.
    pub mix_freq: f32,
    pub frame_size_ms: f32,
    pub frame_step_ms: f32,
    pub attack_start_ms: f32,
    pub attack_end_ms: f32,
    pub zeropad: u32,
    pub loop_type: LoopType,
    pub loop_start: i32,
    pub loop_end: i32,
    /// Zero values the encoder prepended before the first frame.
    pub zero_values_at_start: u32,
    /// Number of source samples that were encoded.
    pub sample_count: u32,
    /// Source samples for "play original" previews; usually empty.
    pub original_samples: Vec<f32>,
    /// Gain applied to `original_samples` on replay, in dB.
    pub original_samples_norm_db: f64,
    pub contents: Vec<AudioBlock>,
}

impl Default for Audio {
    fn default() -> Self {
        Self {
            fundamental_freq: 0.0,
            mix_freq: 0.0,
            frame_size_ms: 0.0,
            frame_step_ms: 0.0,
            attack_start_ms: 0.0,
            attack_end_ms: 0.0,
            zeropad: 0,
            loop_type: LoopType::None,
            loop_start: 0,
            loop_end: 0,
            zero_values_at_start: 0,
            sample_count: 0,
            original_samples: Vec::new(),
            original_samples_norm_db: 0.0,
            contents: Vec::new(),
        }
    }
}

impl Audio {
    /// Approximate heap footprint in bytes.
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + 4 * self.original_samples.len()
            + self
                .contents
                .iter()
                .map(|b| std::mem::size_of::<AudioBlock>() + b.mem_size())
                .sum::<usize>()
    }

    /// Drop debug-only data.
    pub fn strip_debug(&mut self) {
        for block in &mut self.contents {
            block.original_fft = Vec::new();
            block.debug_samples = Vec::new();
        }
        self.original_samples = Vec::new();
    }

    /// Index of the last frame, 0 for empty content.
    pub fn last_frame(&self) -> i32 {
        self.contents.len().saturating_sub(1) as i32
    }
}
