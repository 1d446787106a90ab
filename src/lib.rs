//! # smorph - Instrument Encoding Engine
//!
//! Turns multi-sample instruments into sine + noise models.
//!
//! ## Architecture
//!
//! smorph is an umbrella crate that coordinates:
//! - **smorph-core** - Data model (WavData, Instrument, Audio, WavSet) and quantization
//! - **smorph-analysis** - Noise bands, encoder, auto volume and auto tune
//! - **smorph-builder** - Encode cache, wave set builder and builder thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use smorph::prelude::*;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(InstEncCache::new(CacheConfig::user_cache())?);
//!
//! let mut instrument = Instrument::new();
//! let index = instrument.add_sample_file("flute-a4.wav")?;
//! instrument.set_midi_note(index, 69)?;
//!
//! let wav_set = WavSetBuilder::new(&instrument, false, cache).run()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Everything
//! - `builder` - Encode cache, wave set builder and builder thread

/// Re-export of smorph-core for direct access
pub use smorph_core as core;

/// Re-export of smorph-analysis for direct access
pub use smorph_analysis as analysis;

#[cfg(feature = "builder")]
pub use smorph_builder as builder;

// Core types
pub use smorph_core::{
    Audio, AudioBlock, AutoTune, AutoTuneMethod, AutoVolume, AutoVolumeMethod, CancelToken,
    EncoderConfig, EncoderEntry, Instrument, InstrumentEvent, LoopMode, LoopType, MarkerType,
    Sample, WavData, WavSet, WavSetWave,
};

// Analysis
pub use smorph_analysis::{InstEncoder, NoiseBandPartition, ENCODER_VERSION};

// Builder
#[cfg(feature = "builder")]
pub use smorph_builder::{
    BuilderThread, CacheConfig, CacheStats, Error, Group, InstEncCache, Result, WavSetBuilder,
};

/// Convenience prelude for common imports
pub mod prelude {
    // Data model
    pub use crate::core::{
        Audio, AutoTune, AutoTuneMethod, AutoVolume, AutoVolumeMethod, CancelToken,
        EncoderConfig, Instrument, LoopMode, LoopType, MarkerType, WavData, WavSet,
    };

    // Analysis
    pub use crate::analysis::audio_tool;
    pub use crate::analysis::InstEncoder;

    // Builds
    #[cfg(feature = "builder")]
    pub use crate::builder::{BuilderThread, CacheConfig, InstEncCache, WavSetBuilder};
}
