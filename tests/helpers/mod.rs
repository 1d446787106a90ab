//! Test helpers and fixtures for smorph integration tests
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-9): Exact arithmetic
//! - `IDB_EPSILON` (0.002): Quantized magnitudes
//! - `IFREQ_EPSILON` (0.0005): Quantized frequencies
//! - `PEAK_MAG_EPSILON` / `PEAK_FREQ_EPSILON`: Detected partials

#![allow(dead_code)]

pub mod tolerances;

use smorph::prelude::*;
use std::sync::{Arc, Once};

/// Default test sample rate
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Install a tracing subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Generate a test signal: sine wave at given frequency for specified samples.
pub fn generate_sine(frequency: f64, amplitude: f64, sample_rate: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            (amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()) as f32
        })
        .collect()
}

/// Generate a harmonic tone with `1/n` partial amplitudes.
pub fn generate_harmonic(fundamental: f64, partials: usize, sample_rate: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            (1..=partials)
                .map(|n| 0.3 / n as f64 * (2.0 * std::f64::consts::PI * fundamental * n as f64 * t).sin())
                .sum::<f64>() as f32
        })
        .collect()
}

/// Memory only encode cache.
pub fn memory_cache() -> Arc<InstEncCache> {
    Arc::new(InstEncCache::new(CacheConfig::default()).expect("Failed to create cache"))
}

/// Instrument with one sine sample per `(midi_note, seconds)` entry.
pub fn test_instrument(notes: &[(i32, f64)]) -> Instrument {
    let mut instrument = Instrument::new();
    instrument.set_name("Test Instrument");
    for &(note, seconds) in notes {
        let freq = smorph::core::math::freq_from_note(f64::from(note));
        let len = (seconds * TEST_SAMPLE_RATE) as usize;
        let wav = WavData::mono(generate_sine(freq, 0.5, TEST_SAMPLE_RATE, len), TEST_SAMPLE_RATE);
        let index = instrument
            .add_sample(wav, format!("note-{}.wav", note))
            .expect("Failed to add sample");
        instrument
            .set_midi_note(index, note)
            .expect("Failed to set note");
    }
    instrument
}
