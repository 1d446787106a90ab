//! # smorph-core
//!
//! Data model shared by the analysis and builder crates:
//!
//! - [`WavData`]: decoded PCM sample data
//! - [`Instrument`] / [`Sample`]: samples with markers, loop modes and
//!   instrument-wide encode settings, with change events for observers
//! - [`Audio`] / [`AudioBlock`]: encoder output, quantized per frame
//! - [`WavSet`]: the encoded waves of a whole instrument
//! - [`math`]: idb/ifreq quantization and dB helpers
//! - [`CancelToken`]: cooperative cancellation for long running work

pub mod audio;
pub mod cancel;
pub mod error;
pub mod hash;
pub mod instrument;
pub mod math;
pub mod wav_data;
pub mod wav_set;

pub use audio::{Audio, AudioBlock, LoopType};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use instrument::{
    AutoTune, AutoTuneMethod, AutoVolume, AutoVolumeMethod, EncoderConfig, EncoderEntry,
    Instrument, InstrumentEvent, LoopMode, MarkerType, Sample, SampleShared,
};
pub use wav_data::WavData;
pub use wav_set::{WavSet, WavSetWave};
