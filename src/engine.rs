/// Engine acquisition
///
/// The node acquires its detectors and processor on the worker thread at
/// start-up, through an `EngineFactory`, so a licensed engine, the stand-in
/// engines or test fakes can be plugged in without touching the node.

use crate::aggregator::BeamId;
use crate::detector::{BeamDetector, DetectorError, EnergyDetector, EnergyDetectorConfig};
use crate::processor::{AudioProcessor, GainProcessor, ProcessorError};
use tracing::debug;

/// Creates the external capabilities the node drives.
pub trait EngineFactory: Send {
    /// A fresh detector for `beam`. The node loads the model into it.
    fn create_detector(&mut self, beam: BeamId) -> Result<Box<dyn BeamDetector>, DetectorError>;

    /// The processor for `channels` channels at `sample_rate`.
    fn create_processor(
        &mut self,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioProcessor>, ProcessorError>;
}

/// Energy detectors plus gain-only processing.
#[derive(Debug, Clone, Default)]
pub struct StandInEngines {
    detector: EnergyDetectorConfig,
}

impl StandInEngines {
    pub fn new(detector: EnergyDetectorConfig) -> Self {
        Self { detector }
    }
}

impl EngineFactory for StandInEngines {
    fn create_detector(&mut self, beam: BeamId) -> Result<Box<dyn BeamDetector>, DetectorError> {
        self.detector.validate()?;
        debug!("Creating energy detector for beam {}", beam);
        Ok(Box::new(EnergyDetector::new(self.detector.clone())))
    }

    fn create_processor(
        &mut self,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioProcessor>, ProcessorError> {
        debug!(
            "Creating gain processor: {} channels at {} Hz",
            channels, sample_rate
        );
        Ok(Box::new(GainProcessor::new(channels)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stand_in_engines_create_capabilities() {
        let mut engines = StandInEngines::default();

        assert!(engines.create_detector(0).is_ok());
        assert!(engines.create_processor(4, 16000).is_ok());
        assert!(engines.create_processor(0, 16000).is_err());
    }

    #[test]
    fn test_invalid_sensitivity_rejected_at_creation() {
        let mut engines = StandInEngines::new(EnergyDetectorConfig {
            sensitivity: 2.0,
            ..Default::default()
        });

        assert!(matches!(
            engines.create_detector(0),
            Err(DetectorError::InvalidModel(_))
        ));
    }
}
