//! # smorph-analysis
//!
//! Sine + noise analysis of instrument samples.
//!
//! - **Noise bands**: mel scaled partition of a spectrum into noise bands
//! - **Encoder**: STFT, peak search, partial linking and noise envelopes
//! - **Instrument encoder**: frame geometry derived from the MIDI note
//! - **Audio tool**: energy, volume normalization and auto tune on encoded audio
//!
//! All long running entry points take a [`CancelToken`](smorph_core::CancelToken).
//!
//! ## Example
//!
//! ```rust
//! use smorph_analysis::InstEncoder;
//! use smorph_core::{CancelToken, EncoderConfig, WavData};
//!
//! let samples: Vec<f32> = (0..4800)
//!     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin())
//!     .collect();
//! let wav = WavData::mono(samples, 48000.0);
//!
//! let mut encoder = InstEncoder::new();
//! let audio = encoder
//!     .encode(&wav, 69, &EncoderConfig::default(), &CancelToken::new())
//!     .unwrap();
//! assert!(!audio.contents.is_empty());
//! ```

pub mod audio_tool;
pub mod encoder;
pub mod error;
pub mod inst_encoder;
pub mod noise_band_partition;

pub use audio_tool::{Block2Energy, FundamentalEst};
pub use encoder::{Encoder, EncoderParams, NOISE_BANDS};
pub use error::{Error, Result};
pub use inst_encoder::InstEncoder;
pub use noise_band_partition::NoiseBandPartition;

/// Version of the encoder output; cached results of other versions are
/// recomputed.
pub const ENCODER_VERSION: &str = "smorph-inst-encoder-1";
