//! # smorph-builder
//!
//! Turns an [`Instrument`](smorph_core::Instrument) into a playable
//! [`WavSet`](smorph_core::WavSet):
//!
//! - [`InstEncCache`]: memory + disk cache of encoded samples, shared by all builders
//! - [`WavSetBuilder`]: encodes every sample and applies loop, volume and tuning settings
//! - [`BuilderThread`]: runs builders in the background, with cancellation
//!
//! ## Example
//!
//! ```rust,no_run
//! use smorph_builder::{BuilderThread, CacheConfig, InstEncCache, WavSetBuilder};
//! use smorph_core::Instrument;
//! use std::sync::Arc;
//!
//! # fn main() -> smorph_builder::Result<()> {
//! let cache = Arc::new(InstEncCache::new(CacheConfig::user_cache())?);
//! let mut instrument = Instrument::new();
//! instrument.add_sample_file("piano-c4.wav")?;
//!
//! let thread = BuilderThread::new()?;
//! let builder = WavSetBuilder::new(&instrument, false, Arc::clone(&cache));
//! thread.add_job(builder, 1, |wav_set| {
//!     println!("built {} waves", wav_set.waves.len());
//! });
//! # Ok(())
//! # }
//! ```

pub mod builder_thread;
pub mod config;
pub mod error;
pub mod inst_enc_cache;
pub mod wav_set_builder;

pub use builder_thread::{BuilderThread, DoneFn};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use inst_enc_cache::{CacheStats, EncodeRequest, Group, HitCounts, InstEncCache};
pub use wav_set_builder::WavSetBuilder;
