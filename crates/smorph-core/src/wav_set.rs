//! Multi-sample build result.

use crate::audio::Audio;

/// One encoded sample of a [`WavSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct WavSetWave {
    pub midi_note: i32,
    pub channel: u32,
    pub velocity_range_min: u8,
    pub velocity_range_max: u8,
    pub audio: Audio,
}

impl WavSetWave {
    /// Wave covering the full velocity range on channel 0.
    pub fn new(midi_note: i32, audio: Audio) -> Self {
        Self {
            midi_note,
            channel: 0,
            velocity_range_min: 0,
            velocity_range_max: 127,
            audio,
        }
    }
}

/// Encoded waves of an instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WavSet {
    pub name: String,
    pub short_name: String,
    pub waves: Vec<WavSetWave>,
}

impl WavSet {
    /// Wave whose note is closest to `midi_note`.
    pub fn nearest_wave(&self, midi_note: i32) -> Option<&WavSetWave> {
        self.waves
            .iter()
            .min_by_key(|w| (w.midi_note - midi_note).abs())
    }
}
