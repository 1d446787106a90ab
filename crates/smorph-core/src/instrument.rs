//! Instrument model: samples with markers plus instrument-wide encode settings.
//!
//! Edits go through [`Instrument`] so that ordering stays consistent and
//! subscribers (see [`Instrument::subscribe`]) get one [`InstrumentEvent`]
//! per change.

use crate::audio::Audio;
use crate::error::{Error, Result};
use crate::hash::samples_hash;
use crate::wav_data::WavData;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Named time positions inside a sample, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarkerType {
    LoopStart,
    LoopEnd,
    ClipStart,
    ClipEnd,
}

/// Loop behaviour of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopMode {
    #[default]
    None,
    Forward,
    PingPong,
    SingleFrame,
}

/// Decoded sample data plus its content hash.
///
/// Never modified after construction, so builders on other threads can hold
/// it while the instrument keeps being edited.
#[derive(Debug)]
pub struct SampleShared {
    wav_data: WavData,
    wav_data_hash: String,
}

impl SampleShared {
    pub fn new(wav_data: WavData) -> Self {
        let wav_data_hash = samples_hash(wav_data.samples());
        Self {
            wav_data,
            wav_data_hash,
        }
    }

    pub fn wav_data(&self) -> &WavData {
        &self.wav_data
    }

    pub fn wav_data_hash(&self) -> &str {
        &self.wav_data_hash
    }
}

/// One recording mapped to a MIDI note.
#[derive(Debug, Clone)]
pub struct Sample {
    id: u64,
    markers: BTreeMap<MarkerType, f64>,
    midi_note: i32,
    loop_mode: LoopMode,
    volume: f64,
    shared: Arc<SampleShared>,
    filename: String,
    short_name: String,
    audio: Option<Arc<Audio>>,
}

impl Sample {
    fn new(id: u64, wav_data: WavData, filename: String, short_name: String) -> Self {
        Self {
            id,
            markers: BTreeMap::new(),
            midi_note: 69,
            loop_mode: LoopMode::None,
            volume: 0.0,
            shared: Arc::new(SampleShared::new(wav_data)),
            filename,
            short_name,
            audio: None,
        }
    }

    /// Marker position in ms, `None` if unset.
    pub fn get_marker(&self, marker: MarkerType) -> Option<f64> {
        self.markers.get(&marker).copied()
    }

    pub fn markers(&self) -> &BTreeMap<MarkerType, f64> {
        &self.markers
    }

    pub fn midi_note(&self) -> i32 {
        self.midi_note
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Sample volume in dB.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn shared(&self) -> Arc<SampleShared> {
        Arc::clone(&self.shared)
    }

    pub fn wav_data(&self) -> &WavData {
        self.shared.wav_data()
    }

    pub fn wav_data_hash(&self) -> &str {
        self.shared.wav_data_hash()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Analyzed preview audio, if one was attached.
    pub fn audio(&self) -> Option<&Arc<Audio>> {
        self.audio.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoVolumeMethod {
    /// Normalize the energy of the loop region (or whole sample).
    #[default]
    FromLoop,
    /// Apply a fixed gain.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AutoVolume {
    pub enabled: bool,
    pub method: AutoVolumeMethod,
    /// Gain in dB, used by [`AutoVolumeMethod::Global`].
    pub gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoTuneMethod {
    #[default]
    Simple,
    AllFrames,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoTune {
    pub enabled: bool,
    pub method: AutoTuneMethod,
    /// Partials used for fundamental estimation (1..=3): all frames, smooth.
    pub partials: i32,
    /// Smoothing window in ms: smooth.
    pub time: f64,
    /// Correction strength in percent: smooth.
    pub amount: f64,
}

impl Default for AutoTune {
    fn default() -> Self {
        Self {
            enabled: false,
            method: AutoTuneMethod::Simple,
            partials: 1,
            time: 100.0,
            amount: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderEntry {
    pub param: String,
    pub value: String,
}

impl EncoderEntry {
    pub fn new(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            value: value.into(),
        }
    }
}

/// Encoder parameter overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub enabled: bool,
    pub entries: Vec<EncoderEntry>,
}

impl EncoderConfig {
    /// Entries that are in effect (none if disabled).
    pub fn active_entries(&self) -> &[EncoderEntry] {
        if self.enabled {
            &self.entries
        } else {
            &[]
        }
    }

    /// Stable text form of the active entries, part of encode cache keys.
    ///
    /// Each field is length prefixed, so distinct entry lists never share a
    /// key.
    pub fn cache_key(&self) -> String {
        self.active_entries()
            .iter()
            .map(|e| format!("{}:{}={}:{};", e.param.len(), e.param, e.value.len(), e.value))
            .collect()
    }
}

/// Change notifications sent to instrument subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentEvent {
    SamplesChanged,
    SelectedSampleChanged,
    MarkerChanged,
    VolumeChanged,
    /// Name, auto volume, auto tune or encoder config changed.
    GlobalChanged,
}

const AUDIO_EXTENSIONS: [&str; 4] = [".wav", ".flac", ".ogg", ".aiff"];

/// Ordered sample collection with instrument-wide settings.
#[derive(Debug)]
pub struct Instrument {
    samples: Vec<Sample>,
    selected: Option<usize>,
    next_sample_id: u64,
    name: String,
    short_name: String,
    global_volume: f64,
    auto_volume: AutoVolume,
    auto_tune: AutoTune,
    encoder_config: EncoderConfig,
    subscribers: Vec<Sender<InstrumentEvent>>,
}

impl Default for Instrument {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Instrument {
    /// Independent snapshot; subscribers are not carried over.
    fn clone(&self) -> Self {
        Self {
            samples: self.samples.clone(),
            selected: self.selected,
            next_sample_id: self.next_sample_id,
            name: self.name.clone(),
            short_name: self.short_name.clone(),
            global_volume: self.global_volume,
            auto_volume: self.auto_volume,
            auto_tune: self.auto_tune,
            encoder_config: self.encoder_config.clone(),
            subscribers: Vec::new(),
        }
    }
}

impl Instrument {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            selected: None,
            next_sample_id: 0,
            name: "untitled".to_string(),
            short_name: String::new(),
            global_volume: 0.0,
            auto_volume: AutoVolume::default(),
            auto_tune: AutoTune::default(),
            encoder_config: EncoderConfig::default(),
            subscribers: Vec::new(),
        }
    }

    /// Receive change events from now on.
    pub fn subscribe(&mut self) -> Receiver<InstrumentEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: InstrumentEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    /// Add a mono sample; it becomes the selected sample.
    ///
    /// Clip markers span the whole sample, loop markers default to 40%..60%.
    pub fn add_sample(&mut self, wav_data: WavData, filename: impl Into<String>) -> Result<usize> {
        if wav_data.n_channels() != 1 {
            return Err(Error::InvalidWavData(format!(
                "expected mono sample, got {} channels",
                wav_data.n_channels()
            )));
        }
        let filename = filename.into();
        let short_name = Self::gen_short_name(&self.samples, &filename);
        let length_ms = wav_data.length_ms();

        let id = self.next_sample_id;
        self.next_sample_id += 1;

        let mut sample = Sample::new(id, wav_data, filename, short_name);
        sample.markers.insert(MarkerType::ClipStart, 0.0);
        sample.markers.insert(MarkerType::ClipEnd, length_ms);
        sample.markers.insert(MarkerType::LoopStart, 0.4 * length_ms);
        sample.markers.insert(MarkerType::LoopEnd, 0.6 * length_ms);

        self.samples.push(sample);
        self.selected = Some(self.samples.len() - 1);
        self.update_order();

        Ok(self.position_of(id).unwrap_or(0))
    }

    /// Load a WAV file and add it as sample.
    pub fn add_sample_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let wav_data = WavData::load(path)?;
        self.add_sample(wav_data, path.to_string_lossy().into_owned())
    }

    /// Remove the selected sample.
    pub fn remove_sample(&mut self) {
        let Some(selected) = self.selected.filter(|&s| s < self.samples.len()) else {
            return;
        };
        self.samples.remove(selected);
        self.selected = if self.samples.is_empty() {
            None
        } else {
            Some(selected.saturating_sub(1))
        };
        self.emit(InstrumentEvent::SamplesChanged);
    }

    pub fn sample(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    /// Remove all samples and reset settings.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.selected = None;
        self.name = "untitled".to_string();
        self.short_name.clear();
        self.global_volume = 0.0;
        self.auto_volume = AutoVolume::default();
        self.auto_tune = AutoTune::default();
        self.encoder_config = EncoderConfig::default();
        self.emit(InstrumentEvent::SamplesChanged);
        self.emit(InstrumentEvent::GlobalChanged);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.emit(InstrumentEvent::GlobalChanged);
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn set_short_name(&mut self, short_name: impl Into<String>) {
        self.short_name = short_name.into();
        self.emit(InstrumentEvent::GlobalChanged);
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn set_selected(&mut self, selected: Option<usize>) {
        let selected = selected.filter(|&s| s < self.samples.len());
        if self.selected != selected {
            self.selected = selected;
            self.emit(InstrumentEvent::SelectedSampleChanged);
        }
    }

    fn sample_mut(&mut self, index: usize) -> Result<&mut Sample> {
        self.samples
            .get_mut(index)
            .ok_or(Error::SampleNotFound(index))
    }

    fn position_of(&self, id: u64) -> Option<usize> {
        self.samples.iter().position(|s| s.id == id)
    }

    pub fn set_marker(&mut self, index: usize, marker: MarkerType, value_ms: f64) -> Result<()> {
        self.sample_mut(index)?.markers.insert(marker, value_ms);
        self.emit(InstrumentEvent::MarkerChanged);
        Ok(())
    }

    /// Replace all markers of a sample.
    pub fn set_markers(&mut self, index: usize, markers: BTreeMap<MarkerType, f64>) -> Result<()> {
        self.sample_mut(index)?.markers = markers;
        self.emit(InstrumentEvent::MarkerChanged);
        Ok(())
    }

    /// Change the note of a sample; samples are re-sorted, so its index may change.
    pub fn set_midi_note(&mut self, index: usize, midi_note: i32) -> Result<usize> {
        let sample = self.sample_mut(index)?;
        sample.midi_note = midi_note;
        let id = sample.id;
        self.update_order();
        Ok(self.position_of(id).unwrap_or(index))
    }

    pub fn set_loop(&mut self, index: usize, loop_mode: LoopMode) -> Result<()> {
        self.sample_mut(index)?.loop_mode = loop_mode;
        self.emit(InstrumentEvent::MarkerChanged);
        Ok(())
    }

    pub fn set_volume(&mut self, index: usize, volume_db: f64) -> Result<()> {
        self.sample_mut(index)?.volume = volume_db;
        self.emit(InstrumentEvent::VolumeChanged);
        Ok(())
    }

    /// Attach (or drop) the preview audio of a sample.
    pub fn set_sample_audio(&mut self, index: usize, audio: Option<Arc<Audio>>) -> Result<()> {
        self.sample_mut(index)?.audio = audio;
        Ok(())
    }

    /// Sort samples by descending note, then filename. The selection follows its sample.
    pub fn update_order(&mut self) {
        let selected_id = self
            .selected
            .and_then(|s| self.samples.get(s))
            .map(|s| s.id);

        self.samples.sort_by(|a, b| {
            b.midi_note
                .cmp(&a.midi_note)
                .then_with(|| a.filename.cmp(&b.filename))
        });

        if let Some(id) = selected_id {
            self.selected = self.position_of(id);
        }
        self.emit(InstrumentEvent::SamplesChanged);
    }

    /// Number of samples per MIDI note.
    pub fn used_count(&self) -> HashMap<i32, usize> {
        let mut counts = HashMap::new();
        for sample in &self.samples {
            *counts.entry(sample.midi_note).or_insert(0) += 1;
        }
        counts
    }

    /// Global volume in dB.
    pub fn global_volume(&self) -> f64 {
        self.global_volume
    }

    pub fn set_global_volume(&mut self, volume_db: f64) {
        self.global_volume = volume_db;
        self.emit(InstrumentEvent::VolumeChanged);
    }

    pub fn auto_volume(&self) -> AutoVolume {
        self.auto_volume
    }

    pub fn set_auto_volume(&mut self, auto_volume: AutoVolume) {
        self.auto_volume = auto_volume;
        self.emit(InstrumentEvent::GlobalChanged);
    }

    pub fn auto_tune(&self) -> AutoTune {
        self.auto_tune
    }

    pub fn set_auto_tune(&mut self, auto_tune: AutoTune) {
        self.auto_tune = auto_tune;
        self.emit(InstrumentEvent::GlobalChanged);
    }

    pub fn encoder_config(&self) -> &EncoderConfig {
        &self.encoder_config
    }

    pub fn set_encoder_config(&mut self, encoder_config: EncoderConfig) {
        self.encoder_config = encoder_config;
        self.emit(InstrumentEvent::GlobalChanged);
    }

    /// Unique short name derived from the file basename.
    ///
    /// Names differing only in case count as taken, since some filesystems
    /// are case insensitive.
    fn gen_short_name(samples: &[Sample], filename: &str) -> String {
        let mut basename = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for ext in AUDIO_EXTENSIONS {
            if let Some(stripped) = basename.strip_suffix(ext) {
                basename = stripped.to_string();
            }
        }

        let mut i = 1;
        loop {
            let candidate = if i > 1 {
                format!("{}-{}", basename, i)
            } else {
                basename.clone()
            };
            let used = samples
                .iter()
                .any(|s| s.short_name.eq_ignore_ascii_case(&candidate));
            if !used {
                return candidate;
            }
            i += 1;
        }
    }
}
