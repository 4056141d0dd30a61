/// Beam detector capability
///
/// One phrase-spotting session runs per beam. The licensed engine sits
/// behind `BeamDetector`; `EnergyDetector` is the stand-in used when no
/// engine is linked (tests, demos, bring-up on new hardware).

use crate::audio_block::AudioSample;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("License rejected: {0}")]
    LicenseRejected(String),

    #[error("Detector used before a model was loaded")]
    NotLoaded,

    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("Detection error: {0}")]
    DetectionError(String),
}

/// A phrase recognized inside one buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Confidence score (0.0 - 1.0)
    pub score: f32,

    /// Offsets into the beam's stream since the detector started
    pub begin_sample: u64,
    pub end_sample: u64,
}

/// Phrase spotter bound to one beam.
#[cfg_attr(test, mockall::automock)]
pub trait BeamDetector: Send {
    /// Load and configure the phrase model. Failure is fatal for the beam.
    fn load_model(&mut self, path: &Path) -> Result<(), DetectorError>;

    /// Run detection over one mono buffer.
    fn detect(&mut self, samples: &[AudioSample]) -> Result<Option<Detection>, DetectorError>;

    /// Forget any partial phrase state
    fn reset(&mut self);
}

/// Tuning for the energy stand-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyDetectorConfig {
    /// Sensitivity (0.0 - 1.0, higher = more sensitive, more false positives)
    pub sensitivity: f32,

    /// Consecutive loud buffers needed before firing
    pub min_active_blocks: u32,
}

impl Default for EnergyDetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            min_active_blocks: 2,
        }
    }
}

impl EnergyDetectorConfig {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(DetectorError::InvalidModel(
                "Sensitivity must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.min_active_blocks == 0 {
            return Err(DetectorError::InvalidModel(
                "min_active_blocks must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Normalized RMS a buffer must exceed to count as loud
    pub fn rms_threshold(&self) -> f32 {
        0.6 - 0.5 * self.sensitivity
    }
}

/// Loudness-burst phrase stand-in.
///
/// Fires once per burst of `min_active_blocks` loud buffers and re-arms on
/// the first quiet buffer. The score grows with the burst's mean RMS, so the
/// beam pointing at the talker wins the vote.
pub struct EnergyDetector {
    config: EnergyDetectorConfig,
    model: Option<PathBuf>,
    samples_seen: u64,
    burst_start: Option<u64>,
    burst_blocks: u32,
    burst_rms_sum: f32,
    fired: bool,
}

impl EnergyDetector {
    pub fn new(config: EnergyDetectorConfig) -> Self {
        Self {
            config,
            model: None,
            samples_seen: 0,
            burst_start: None,
            burst_blocks: 0,
            burst_rms_sum: 0.0,
            fired: false,
        }
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model.as_deref()
    }

    fn calculate_rms(samples: &[AudioSample]) -> f32 {
        let energy: f64 = samples
            .iter()
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();

        (energy / samples.len() as f64).sqrt() as f32
    }

    fn end_burst(&mut self) {
        self.burst_start = None;
        self.burst_blocks = 0;
        self.burst_rms_sum = 0.0;
        self.fired = false;
    }
}

impl BeamDetector for EnergyDetector {
    fn load_model(&mut self, path: &Path) -> Result<(), DetectorError> {
        self.config.validate()?;

        let metadata = std::fs::metadata(path)
            .map_err(|_| DetectorError::ModelNotFound(path.to_path_buf()))?;

        if !metadata.is_file() || metadata.len() == 0 {
            return Err(DetectorError::InvalidModel(format!(
                "{} is empty or not a file",
                path.display()
            )));
        }

        info!(
            "Loaded model {} (sensitivity {})",
            path.display(),
            self.config.sensitivity
        );
        self.model = Some(path.to_path_buf());
        Ok(())
    }

    fn detect(&mut self, samples: &[AudioSample]) -> Result<Option<Detection>, DetectorError> {
        if self.model.is_none() {
            return Err(DetectorError::NotLoaded);
        }

        if samples.is_empty() {
            return Err(DetectorError::InvalidAudioFormat(
                "Empty buffer".to_string(),
            ));
        }

        let offset = self.samples_seen;
        self.samples_seen += samples.len() as u64;

        let rms = Self::calculate_rms(samples);
        trace!("Energy detector: rms={:.4}", rms);

        if rms <= self.config.rms_threshold() {
            self.end_burst();
            return Ok(None);
        }

        self.burst_start.get_or_insert(offset);
        self.burst_blocks += 1;
        self.burst_rms_sum += rms;

        if self.fired || self.burst_blocks < self.config.min_active_blocks {
            return Ok(None);
        }

        self.fired = true;
        let mean_rms = self.burst_rms_sum / self.burst_blocks as f32;
        let score = (mean_rms / (2.0 * self.config.rms_threshold())).clamp(0.0, 1.0);
        let detection = Detection {
            score,
            begin_sample: self.burst_start.unwrap_or(offset),
            end_sample: self.samples_seen,
        };

        debug!(
            "Energy detector fired: score={:.3}, span={}..{}",
            detection.score, detection.begin_sample, detection.end_sample
        );

        Ok(Some(detection))
    }

    fn reset(&mut self) {
        self.samples_seen = 0;
        self.end_burst();
    }
}
