/// Audio processing capability
///
/// Echo cancellation and gain control run in an external module behind
/// `AudioProcessor`. `GainProcessor` covers the gain-control half for
/// setups without that module; it leaves echo untouched.

use crate::audio_block::AudioSample;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Processor initialization failed: {0}")]
    InitFailed(String),

    #[error("Expected {expected} channels, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// AEC + AGC over one multi-channel frame.
#[cfg_attr(test, mockall::automock)]
pub trait AudioProcessor: Send {
    /// Process one frame (one buffer per channel, equal lengths).
    ///
    /// `agc_target_dbfs` is the positive attenuation below full scale the
    /// gain control aims for; `None` disables gain control.
    fn process(
        &mut self,
        channels: &[Vec<AudioSample>],
        aec_enabled: bool,
        agc_target_dbfs: Option<u8>,
    ) -> Result<Vec<Vec<AudioSample>>, ProcessorError>;
}

/// Peaks below this are treated as silence and leave the gain alone
const NOISE_FLOOR: f32 = 64.0;

/// Per-channel peak-tracking automatic gain control.
pub struct GainProcessor {
    channels: usize,
    gains: Vec<f32>,
    min_gain: f32,
    max_gain: f32,
    /// Fraction of the gap to the desired gain closed per frame when
    /// raising the gain; lowering is immediate to avoid clipping
    attack: f32,
}

impl GainProcessor {
    pub fn new(channels: usize) -> Result<Self, ProcessorError> {
        if channels == 0 {
            return Err(ProcessorError::InitFailed(
                "channel count must be greater than 0".to_string(),
            ));
        }

        debug!("Creating gain processor for {} channels", channels);

        Ok(Self {
            channels,
            gains: vec![1.0; channels],
            min_gain: 0.1,
            max_gain: 8.0,
            attack: 0.2,
        })
    }

    /// Current gain of each channel
    pub fn gains(&self) -> &[f32] {
        &self.gains
    }

    /// Linear peak the AGC aims for
    pub fn target_peak(dbfs: u8) -> f32 {
        i16::MAX as f32 * 10f32.powf(-(dbfs as f32) / 20.0)
    }

    fn apply_gain(
        gain: &mut f32,
        samples: &[AudioSample],
        target: f32,
        min: f32,
        max: f32,
        attack: f32,
    ) -> Vec<AudioSample> {
        let peak = samples
            .iter()
            .map(|&s| (s as f32).abs())
            .fold(0.0f32, f32::max);

        if peak > NOISE_FLOOR {
            let desired = (target / peak).clamp(min, max);
            if desired < *gain {
                *gain = desired;
            } else {
                *gain += (desired - *gain) * attack;
            }
        }

        samples
            .iter()
            .map(|&s| (s as f32 * *gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect()
    }
}

impl AudioProcessor for GainProcessor {
    fn process(
        &mut self,
        channels: &[Vec<AudioSample>],
        aec_enabled: bool,
        agc_target_dbfs: Option<u8>,
    ) -> Result<Vec<Vec<AudioSample>>, ProcessorError> {
        if channels.len() != self.channels {
            return Err(ProcessorError::ChannelMismatch {
                expected: self.channels,
                got: channels.len(),
            });
        }

        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(ProcessorError::InvalidFrame(
                "channels differ in length".to_string(),
            ));
        }

        trace!(
            "Gain processor: {} frames, aec={}, agc={:?}",
            frames,
            aec_enabled,
            agc_target_dbfs
        );

        let Some(dbfs) = agc_target_dbfs else {
            return Ok(channels.to_vec());
        };

        let target = Self::target_peak(dbfs);
        let (min, max, attack) = (self.min_gain, self.max_gain, self.attack);

        Ok(channels
            .iter()
            .zip(self.gains.iter_mut())
            .map(|(samples, gain)| Self::apply_gain(gain, samples, target, min, max, attack))
            .collect())
    }
}
