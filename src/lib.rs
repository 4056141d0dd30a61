/// Multi-beam hotword confirmation and direction-of-arrival library
///
/// Runs one phrase detector per beamformed channel, confirms a trigger once
/// the other beams have had a short window to vote, and reports the winning
/// beam's direction to any thread that asks.

pub mod aggregator;
pub mod audio_block;
pub mod chain;
pub mod config;
pub mod detector;
pub mod direction;
pub mod engine;
pub mod node;
pub mod pipeline;
pub mod processor;
pub mod source;
pub mod state;

// Re-export main types
pub use aggregator::{AggregatorOutcome, BeamId, BeamScoreTable, TriggerAggregator, TriggerEvent};
pub use audio_block::{AudioBlock, AudioBlockError, AudioSample, SampleLayout, SAMPLE_RATE};
pub use chain::{BlockNode, ChainState, ChainStateHandle, DirectionReporter, HotwordReporter};
pub use config::{ConfigError, FakeTriggerConfig, HotwordFlagMode, NodeConfig, OutputChannels};
pub use detector::{BeamDetector, Detection, DetectorError, EnergyDetector, EnergyDetectorConfig};
pub use direction::{resolve_direction, DirectionError};
pub use engine::{EngineFactory, StandInEngines};
pub use node::{DoaKwsNode, NodeError, NodeStats};
pub use pipeline::{BlockSink, BlockSource, NullSink, Pipeline, PipelineError, PipelineHandle};
pub use processor::{AudioProcessor, GainProcessor, ProcessorError};
pub use source::{SourceError, WavFileSource};
pub use state::{DetectionDecision, DetectionHandle, DetectionStateStore};
