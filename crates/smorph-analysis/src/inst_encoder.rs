//! Encoder setup for instrument samples.

use crate::encoder::{Encoder, EncoderParams};
use crate::error::Result;
use smorph_core::math::{freq_from_note, window_cos};
use smorph_core::{Audio, CancelToken, EncoderConfig, WavData};
use tracing::debug;

const DEFAULT_MIN_FRAME_PERIODS: f64 = 4.0;
const DEFAULT_MIN_FRAME_SIZE_MS: f64 = 40.0;
const ZEROPAD: usize = 4;

/// Encodes one sample of an instrument with frame geometry derived from its
/// MIDI note.
#[derive(Debug, Default)]
pub struct InstEncoder {
    params: EncoderParams,
    window: Vec<f32>,
}

impl InstEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters of the last [`encode`](Self::encode) call.
    pub fn params(&self) -> &EncoderParams {
        &self.params
    }

    /// Window of the last [`encode`](Self::encode) call.
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    fn setup_params(&mut self, wav_data: &WavData, midi_note: i32, cfg: &EncoderConfig) {
        let mut params = EncoderParams::default();
        params.set_config(cfg);
        params.check_unknown_params();

        let mix_freq = wav_data.mix_freq();
        let fundamental_freq = freq_from_note(f64::from(midi_note));
        let min_frame_periods = params
            .get_param("min-frame-periods")
            .unwrap_or(DEFAULT_MIN_FRAME_PERIODS);
        let min_frame_size_ms = params
            .get_param("min-frame-size")
            .unwrap_or(DEFAULT_MIN_FRAME_SIZE_MS);

        let frame_size_ms = min_frame_size_ms.max(1000.0 / fundamental_freq * min_frame_periods);
        let frame_step_ms = frame_size_ms / 4.0;

        let mut frame_size = (mix_freq * 0.001 * frame_size_ms).ceil().max(3.0) as usize;
        if frame_size % 2 == 0 {
            frame_size += 1;
        }
        let frame_step = ((mix_freq * 0.001 * frame_step_ms).round() as usize).max(1);
        let block_size = frame_size.next_power_of_two();

        params.mix_freq = mix_freq;
        params.zeropad = ZEROPAD;
        params.fundamental_freq = fundamental_freq;
        params.frame_size_ms = frame_size_ms;
        params.frame_step_ms = frame_step_ms;
        params.frame_size = frame_size;
        params.frame_step = frame_step;
        params.block_size = block_size;
        params.enable_phases = false;

        self.window = (0..block_size)
            .map(|i| {
                if i < frame_size {
                    window_cos(2.0 * i as f64 / (frame_size - 1) as f64 - 1.0) as f32
                } else {
                    0.0
                }
            })
            .collect();
        self.params = params;

        debug!(
            "inst encoder: note {} frame {:.2}ms ({} samples) step {:.2}ms block {}",
            midi_note, frame_size_ms, frame_size, frame_step_ms, block_size
        );
    }

    /// Encode channel 0 of `wav_data` as note `midi_note`.
    ///
    /// The result has its debug data and original samples stripped.
    pub fn encode(
        &mut self,
        wav_data: &WavData,
        midi_note: i32,
        cfg: &EncoderConfig,
        cancel: &CancelToken,
    ) -> Result<Audio> {
        self.setup_params(wav_data, midi_note, cfg);

        let mut encoder = Encoder::new(self.params.clone());
        encoder.encode(wav_data, 0, &self.window, 1, true, true, cancel)?;

        let mut audio = encoder.save_as_audio();
        audio.strip_debug();
        Ok(audio)
    }
}
