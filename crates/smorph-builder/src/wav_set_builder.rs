//! Build a [`WavSet`] from an instrument snapshot.

use crate::error::{Error, Result};
use crate::inst_enc_cache::{EncodeRequest, Group, InstEncCache};
use smorph_analysis::audio_tool;
use smorph_core::math::db_to_factor;
use smorph_core::{
    Audio, AutoTune, AutoTuneMethod, AutoVolume, AutoVolumeMethod, CancelToken, EncoderConfig,
    Instrument, LoopMode, LoopType, MarkerType, SampleShared, WavSet, WavSetWave,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct SampleData {
    midi_note: i32,
    loop_mode: LoopMode,
    clip_start_ms: f64,
    clip_end_ms: Option<f64>,
    loop_start_ms: f64,
    loop_end_ms: f64,
    volume: f64,
    shared: Arc<SampleShared>,
}

/// Encodes all samples of an instrument and applies loop, volume and tuning
/// settings.
///
/// Everything is copied from the instrument on construction, so the
/// instrument may change while [`run`](Self::run) executes on another thread.
pub struct WavSetBuilder {
    samples: Vec<SampleData>,
    name: String,
    short_name: String,
    global_volume: f64,
    auto_volume: AutoVolume,
    auto_tune: AutoTune,
    encoder_config: EncoderConfig,
    keep_samples: bool,
    cache: Arc<InstEncCache>,
    cache_group: Option<Group>,
    cancel: CancelToken,
}

impl WavSetBuilder {
    /// Snapshot `instrument`.
    ///
    /// With `keep_samples`, each wave's audio carries the clipped original
    /// samples for playback of the unprocessed recording.
    pub fn new(instrument: &Instrument, keep_samples: bool, cache: Arc<InstEncCache>) -> Self {
        let samples = instrument
            .samples()
            .iter()
            .map(|sample| {
                let marker = |m| sample.get_marker(m);
                SampleData {
                    midi_note: sample.midi_note(),
                    loop_mode: sample.loop_mode(),
                    clip_start_ms: marker(MarkerType::ClipStart).unwrap_or(0.0).max(0.0),
                    clip_end_ms: marker(MarkerType::ClipEnd),
                    loop_start_ms: marker(MarkerType::LoopStart).unwrap_or(0.0),
                    loop_end_ms: marker(MarkerType::LoopEnd).unwrap_or(0.0),
                    volume: sample.volume(),
                    shared: sample.shared(),
                }
            })
            .collect();

        Self {
            samples,
            name: instrument.name().to_string(),
            short_name: instrument.short_name().to_string(),
            global_volume: instrument.global_volume(),
            auto_volume: instrument.auto_volume(),
            auto_tune: instrument.auto_tune(),
            encoder_config: instrument.encoder_config().clone(),
            keep_samples,
            cache,
            cache_group: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn set_cancel_token(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Tag cache lookups of this build with `group`.
    pub fn set_cache_group(&mut self, group: Group) {
        self.cache_group = Some(group);
    }

    /// Encode and post-process all samples.
    ///
    /// Returns `Err(Error::Cancelled)` as soon as the cancel token fires.
    pub fn run(&self) -> Result<WavSet> {
        let mut wav_set = WavSet {
            name: self.name.clone(),
            short_name: self.short_name.clone(),
            waves: Vec::with_capacity(self.samples.len()),
        };

        for sd in &self.samples {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let wav_data = sd.shared.wav_data();
            let (clip_start, clip_end) = clip_range(sd);

            let request = EncodeRequest {
                wav_data,
                wav_data_hash: sd.shared.wav_data_hash(),
                midi_note: sd.midi_note,
                clip_start,
                clip_end,
                encoder_config: &self.encoder_config,
                group: self.cache_group.as_ref(),
            };
            let mut audio = self.cache.encode(&request, &self.cancel)?;

            if self.keep_samples {
                audio.original_samples = wav_data.samples()[clip_start..clip_end].to_vec();
            }

            apply_loop_settings(sd, &mut audio);
            self.apply_auto_volume(&mut audio);
            self.apply_volume_settings(sd, &mut audio);
            self.apply_auto_tune(&mut audio);

            wav_set.waves.push(WavSetWave::new(sd.midi_note, audio));
        }
        Ok(wav_set)
    }

    fn apply_auto_volume(&self, audio: &mut Audio) {
        if !self.auto_volume.enabled {
            return;
        }
        match self.auto_volume.method {
            AutoVolumeMethod::FromLoop => {
                let energy = audio_tool::compute_energy(audio);
                audio_tool::normalize_energy(energy, audio);
            }
            AutoVolumeMethod::Global => {
                audio_tool::normalize_factor(db_to_factor(self.auto_volume.gain), audio);
            }
        }
    }

    fn apply_volume_settings(&self, sd: &SampleData, audio: &mut Audio) {
        let volume = sd.volume + self.global_volume;
        if volume != 0.0 {
            audio_tool::normalize_factor(db_to_factor(volume), audio);
        }
    }

    fn apply_auto_tune(&self, audio: &mut Audio) {
        if !self.auto_tune.enabled {
            return;
        }
        match self.auto_tune.method {
            AutoTuneMethod::Simple => {
                if let Some(factor) = audio_tool::get_auto_tune_factor(audio) {
                    audio_tool::apply_auto_tune_factor(audio, factor);
                }
            }
            AutoTuneMethod::AllFrames => {
                for block in &mut audio.contents {
                    let est_freq = audio_tool::estimate_fundamental(block, self.auto_tune.partials);
                    audio_tool::apply_auto_tune_factor_block(block, 1.0 / est_freq);
                }
            }
            AutoTuneMethod::Smooth => audio_tool::auto_tune_smooth(
                audio,
                self.auto_tune.partials,
                self.auto_tune.time,
                self.auto_tune.amount,
            ),
        }
    }
}

/// Encoded range in sample values; looped samples run to the end of the data.
fn clip_range(sd: &SampleData) -> (usize, usize) {
    let wav_data = sd.shared.wav_data();
    let n_values = wav_data.n_values();
    let to_index = |ms: f64| ((ms * wav_data.mix_freq() / 1000.0).round().max(0.0) as usize).min(n_values);

    let clip_start = to_index(sd.clip_start_ms);
    let clip_end = match (sd.loop_mode, sd.clip_end_ms) {
        (LoopMode::None, Some(end_ms)) => to_index(end_ms),
        _ => n_values,
    };
    (clip_start, clip_end.max(clip_start))
}

fn apply_loop_settings(sd: &SampleData, audio: &mut Audio) {
    let zero_values_ms = if audio.mix_freq > 0.0 {
        f64::from(audio.zero_values_at_start) * 1000.0 / f64::from(audio.mix_freq)
    } else {
        0.0
    };
    let last_frame = audio.last_frame();
    let to_frame = |ms: f64| {
        if audio.frame_step_ms <= 0.0 {
            return 0;
        }
        let pos = (ms - sd.clip_start_ms + zero_values_ms) / f64::from(audio.frame_step_ms);
        (pos.round() as i32).clamp(0, last_frame)
    };
    let loop_start = to_frame(sd.loop_start_ms);
    let loop_end = to_frame(sd.loop_end_ms);

    let (loop_type, start, end) = match sd.loop_mode {
        LoopMode::None => (LoopType::None, 0, 0),
        LoopMode::Forward => (LoopType::FrameForward, loop_start, loop_end),
        LoopMode::PingPong => (LoopType::FramePingPong, loop_start, loop_end),
        LoopMode::SingleFrame => (LoopType::FrameForward, loop_start, loop_start),
    };
    audio.loop_type = loop_type;
    audio.loop_start = start;
    audio.loop_end = end;

    debug!(
        "wav set: note {} loop {} [{}..{}]",
        sd.midi_note, loop_type, start, end
    );
}
