/// Node configuration
///
/// Everything the node needs before `on_start_thread`: stream layout, beam
/// count, underclocking, audio-processing switches and the confirmation
/// window tuning. Loadable from JSON; missing fields take their defaults.

use crate::audio_block::{SampleLayout, SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Largest beam count the node accepts
pub const MAX_BEAMS: usize = 16;

/// Highest AGC target the processing module accepts (dBFS below full scale)
pub const MAX_AGC_TARGET_DBFS: u8 = 31;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// How `hotword_detected()` behaves after it has reported a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotwordFlagMode {
    /// The flag clears on the first read that returns `true`
    #[default]
    OneShot,

    /// The flag stays raised until the next commit or an explicit clear
    Sticky,
}

/// Which channels the node passes downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannels {
    /// Every processed channel, beams followed by the reference channel
    #[default]
    All,

    /// Only the beam of the last confirmed detection (reference channel
    /// until the first detection)
    PickedBeam,
}

/// Suppression of isolated single-beam triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeTriggerConfig {
    pub enabled: bool,

    /// A single-beam window is treated as noise once every other beam has
    /// gone more than this many cycles without a trigger
    pub non_trigger_streak_threshold: u32,

    /// After a suppression, single-beam windows closing within this many
    /// milliseconds are suppressed regardless of the streak
    pub holdoff_after_fake_ms: u64,
}

impl Default for FakeTriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            non_trigger_streak_threshold: 10,
            holdoff_after_fake_ms: 0,
        }
    }
}

/// Configuration for the DOA + KWS node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Phrase-spotting model loaded into every beam's detector
    pub model_path: PathBuf,

    pub sample_rate: u32,

    /// Beamformed channels; the input carries one extra reference channel
    pub num_beams: usize,

    /// Duration of each upstream block
    pub block_len_ms: u32,

    pub input_layout: SampleLayout,
    pub output_layout: SampleLayout,
    pub output_channels: OutputChannels,

    /// Input blocks gathered per processing cycle (1 = every block)
    pub underclocking_count: usize,

    pub enable_agc: bool,

    /// AGC target as a positive attenuation: 3 means -3 dBFS
    pub agc_target_level_dbfs: u8,

    /// Keep echo cancellation running while the chain is in a listen state
    pub do_aec_when_listen: bool,

    /// How long other beams may corroborate after the first trigger
    pub trigger_post_confirm_threshold_ms: u64,

    /// Mechanical rotation of microphone 0 (30 for ReSpeaker v2)
    pub mic0_angle_offset: i32,

    /// Move the chain to its listen state on every confirmed detection
    pub auto_state_transfer: bool,

    pub hotword_flag_mode: HotwordFlagMode,

    /// Frame size the audio processor accepts per call
    pub apm_frame_ms: u32,

    /// Triggers arriving this soon after a confirmation are ignored
    pub post_decision_holdoff_ms: u64,

    pub fake_trigger: FakeTriggerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/hotword.snsr"),
            sample_rate: SAMPLE_RATE,
            num_beams: 6,
            block_len_ms: 10,
            input_layout: SampleLayout::Interleaved,
            output_layout: SampleLayout::Deinterleaved,
            output_channels: OutputChannels::All,
            underclocking_count: 1,
            enable_agc: true,
            agc_target_level_dbfs: 3,
            do_aec_when_listen: true,
            trigger_post_confirm_threshold_ms: 300,
            mic0_angle_offset: 0,
            auto_state_transfer: true,
            hotword_flag_mode: HotwordFlagMode::OneShot,
            apm_frame_ms: 10,
            post_decision_holdoff_ms: 0,
            fake_trigger: FakeTriggerConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading node config from {}", path.display());

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "model_path is required".to_string(),
            ));
        }

        if self.num_beams == 0 || self.num_beams > MAX_BEAMS {
            return Err(ConfigError::InvalidConfig(format!(
                "num_beams must be between 1 and {}, got {}",
                MAX_BEAMS, self.num_beams
            )));
        }

        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidConfig(
                "sample_rate must be greater than 0".to_string(),
            ));
        }

        if self.block_len_ms == 0 || self.frames_per_block() == 0 {
            return Err(ConfigError::InvalidConfig(
                "block_len_ms must cover at least one sample".to_string(),
            ));
        }

        if (self.sample_rate as u64 * self.block_len_ms as u64) % 1000 != 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "{} ms blocks do not hold a whole number of samples at {} Hz",
                self.block_len_ms, self.sample_rate
            )));
        }

        if self.underclocking_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "underclocking_count must be at least 1".to_string(),
            ));
        }

        validate_agc_target(self.agc_target_level_dbfs)?;

        if self.apm_frame_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "apm_frame_ms must be greater than 0".to_string(),
            ));
        }

        let cycle_ms = self.block_len_ms as u64 * self.underclocking_count as u64;
        if cycle_ms % self.apm_frame_ms as u64 != 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "cycle length {} ms is not a multiple of the {} ms processing frame",
                cycle_ms, self.apm_frame_ms
            )));
        }

        if !self.model_path.exists() {
            warn!("Model file not found: {}", self.model_path.display());
            // Detectors reject it at startup
        }

        Ok(())
    }

    /// Channels in every input block: the beams plus the reference channel
    pub fn input_channels(&self) -> usize {
        self.num_beams + 1
    }

    /// Index of the non-beamformed reference channel
    pub fn reference_channel(&self) -> usize {
        self.num_beams
    }

    pub fn frames_per_block(&self) -> usize {
        (self.sample_rate as u64 * self.block_len_ms as u64 / 1000) as usize
    }

    pub fn frames_per_apm_frame(&self) -> usize {
        (self.sample_rate as u64 * self.apm_frame_ms as u64 / 1000) as usize
    }

    pub fn trigger_post_confirm_threshold(&self) -> Duration {
        Duration::from_millis(self.trigger_post_confirm_threshold_ms)
    }

    /// Target passed to the processor, `None` while AGC is disabled
    pub fn agc_target(&self) -> Option<u8> {
        self.enable_agc.then_some(self.agc_target_level_dbfs)
    }
}

/// Check an AGC target against the processor's accepted range
pub fn validate_agc_target(dbfs: u8) -> Result<(), ConfigError> {
    if dbfs > MAX_AGC_TARGET_DBFS {
        return Err(ConfigError::InvalidConfig(format!(
            "agc_target_level_dbfs must be between 0 and {}, got {}",
            MAX_AGC_TARGET_DBFS, dbfs
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_channels(), 7);
        assert_eq!(config.reference_channel(), 6);
        assert_eq!(config.frames_per_block(), 160);
        assert_eq!(config.agc_target(), Some(3));
        assert_eq!(config.hotword_flag_mode, HotwordFlagMode::OneShot);
    }

    #[test]
    fn test_config_validation() {
        let mut config = NodeConfig::default();

        config.num_beams = 0;
        assert!(config.validate().is_err());
        config.num_beams = MAX_BEAMS + 1;
        assert!(config.validate().is_err());
        config.num_beams = 3;

        config.agc_target_level_dbfs = 32;
        assert!(config.validate().is_err());
        config.agc_target_level_dbfs = 31;
        assert!(config.validate().is_ok());

        config.underclocking_count = 0;
        assert!(config.validate().is_err());
        config.underclocking_count = 2;

        // 8 ms blocks x 2 = 16 ms, not a multiple of 10 ms frames
        config.block_len_ms = 8;
        assert!(config.validate().is_err());

        config.underclocking_count = 5;
        assert!(config.validate().is_ok());

        config.model_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fractional_block_rejected() {
        let config = NodeConfig {
            sample_rate: 11025,
            block_len_ms: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agc_disabled_has_no_target() {
        let config = NodeConfig {
            enable_agc: false,
            ..Default::default()
        };
        assert_eq!(config.agc_target(), None);
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "num_beams": 4,
                "mic0_angle_offset": 30,
                "hotword_flag_mode": "sticky",
                "input_layout": "deinterleaved",
                "fake_trigger": {{ "enabled": true }}
            }}"#
        )
        .unwrap();

        let config = NodeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.num_beams, 4);
        assert_eq!(config.mic0_angle_offset, 30);
        assert_eq!(config.hotword_flag_mode, HotwordFlagMode::Sticky);
        assert_eq!(config.input_layout, SampleLayout::Deinterleaved);
        assert!(config.fake_trigger.enabled);
        assert_eq!(config.fake_trigger.non_trigger_streak_threshold, 10);
        assert_eq!(config.trigger_post_confirm_threshold_ms, 300);
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"num_beams\": \"six\" }}").unwrap();

        match NodeConfig::from_json_file(file.path()) {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"agc_target_level_dbfs\": 40 }}").unwrap();

        match NodeConfig::from_json_file(file.path()) {
            Err(ConfigError::InvalidConfig(msg)) => assert!(msg.contains("agc_target")),
            other => panic!("Expected InvalidConfig error, got {:?}", other),
        }
    }
}
