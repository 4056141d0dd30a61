/// DOA + KWS node
///
/// The per-block driver. Each cycle the node runs the beams through the
/// audio processor, hands every beam to its detector, feeds the triggers to
/// the aggregator and, when a window confirms, resolves the direction and
/// commits the decision for the query threads.

use crate::aggregator::{AggregatorConfig, AggregatorOutcome, BeamId, TriggerAggregator, TriggerEvent};
use crate::audio_block::{AudioBlock, AudioBlockError, AudioSample, BlockAccumulator};
use crate::chain::{BlockNode, ChainStateHandle, DirectionReporter, HotwordReporter};
use crate::config::{validate_agc_target, ConfigError, NodeConfig, OutputChannels};
use crate::detector::{BeamDetector, DetectorError};
use crate::direction::{resolve_direction, DirectionError};
use crate::engine::EngineFactory;
use crate::processor::{AudioProcessor, ProcessorError};
use crate::state::{DetectionHandle, DetectionStateStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Detector for beam {beam} failed: {source}")]
    Detector {
        beam: BeamId,
        #[source]
        source: DetectorError,
    },

    #[error("Audio processor failed: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Invalid audio block: {0}")]
    AudioBlock(#[from] AudioBlockError),

    #[error("Direction error: {0}")]
    Direction(#[from] DirectionError),

    #[error("Unsupported block: {0}")]
    UnsupportedBlock(String),

    #[error("Node not started")]
    NotStarted,
}

/// Node statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub blocks_received: u64,
    pub blocks_dropped: u64,
    pub cycles_run: u64,
    pub triggers_seen: u64,
    pub detections_confirmed: u64,
    pub windows_discarded: u64,
    pub fake_triggers_suppressed: u64,
    pub detector_errors: u64,
    pub processor_errors: u64,
}

/// Beam-trigger confirmation and direction node.
pub struct DoaKwsNode {
    config: NodeConfig,
    factory: Box<dyn EngineFactory>,
    processor: Option<Box<dyn AudioProcessor>>,
    detectors: Vec<Box<dyn BeamDetector>>,
    accumulator: Option<BlockAccumulator>,
    aggregator: TriggerAggregator,
    store: Arc<DetectionStateStore>,
    chain_state: ChainStateHandle,
    last_picked_beam: Option<BeamId>,
    stats: NodeStats,
    started: bool,
}

fn aggregator_config(config: &NodeConfig) -> AggregatorConfig {
    AggregatorConfig {
        num_beams: config.num_beams,
        post_confirm_threshold: config.trigger_post_confirm_threshold(),
        post_decision_holdoff: Duration::from_millis(config.post_decision_holdoff_ms),
        fake_trigger: config.fake_trigger.clone(),
    }
}

impl DoaKwsNode {
    /// Create a node. Engines are only acquired in `on_start_thread`.
    pub fn new(config: NodeConfig, factory: Box<dyn EngineFactory>) -> Result<Self, NodeError> {
        config.validate()?;

        info!("Initializing DOA/KWS node");
        info!(
            "Beams: {}, block: {} ms, underclocking: {}",
            config.num_beams, config.block_len_ms, config.underclocking_count
        );
        info!("Model: {}", config.model_path.display());

        Ok(Self {
            aggregator: TriggerAggregator::new(aggregator_config(&config)),
            store: Arc::new(DetectionStateStore::new(config.hotword_flag_mode)),
            config,
            factory,
            processor: None,
            detectors: Vec::new(),
            accumulator: None,
            chain_state: ChainStateHandle::default(),
            last_picked_beam: None,
            stats: NodeStats::default(),
            started: false,
        })
    }

    /// Share a chain state with other nodes of the same chain
    pub fn with_chain_state(mut self, chain_state: ChainStateHandle) -> Self {
        self.chain_state = chain_state;
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Read handle for query threads
    pub fn detection_handle(&self) -> DetectionHandle {
        DetectionHandle::new(self.store.clone())
    }

    pub fn chain_state(&self) -> ChainStateHandle {
        self.chain_state.clone()
    }

    /// Detectors currently held
    pub fn acquired_detectors(&self) -> usize {
        self.detectors.len()
    }

    /// Time other beams get to corroborate the first trigger. Applies from
    /// the next window; an open window keeps its deadline.
    pub fn set_trigger_post_confirm_threshold_time(&mut self, ms: u64) {
        self.config.trigger_post_confirm_threshold_ms = ms;
        self.aggregator
            .set_post_confirm_threshold(Duration::from_millis(ms));
    }

    /// Mounting rotation of microphone 0, e.g. 30 for ReSpeaker v2
    pub fn set_angle_for_mic0(&mut self, angle: i32) {
        self.config.mic0_angle_offset = angle;
    }

    pub fn set_do_aec_when_listen(&mut self, do_aec_when_listen: bool) {
        self.config.do_aec_when_listen = do_aec_when_listen;
    }

    /// Leave chain-state changes to the caller
    pub fn disable_auto_state_transfer(&mut self) {
        self.config.auto_state_transfer = false;
    }

    /// AGC target in dBFS below full scale, 0 to 31
    pub fn set_agc_target_level_dbfs(&mut self, dbfs: u8) -> Result<(), NodeError> {
        validate_agc_target(dbfs)?;
        self.config.agc_target_level_dbfs = dbfs;
        Ok(())
    }

    fn check_block(&self, block: &AudioBlock) -> Result<(), NodeError> {
        let expected_channels = self.config.input_channels();
        if block.channels() != expected_channels {
            return Err(NodeError::UnsupportedBlock(format!(
                "expected {} channels, got {}",
                expected_channels,
                block.channels()
            )));
        }

        let expected_frames = self.config.frames_per_block();
        if block.frames() != expected_frames {
            return Err(NodeError::UnsupportedBlock(format!(
                "expected {} frames, got {}",
                expected_frames,
                block.frames()
            )));
        }

        Ok(())
    }

    /// Run the processor over the cycle in APM-sized frames.
    fn run_processor(
        &mut self,
        channels: &[Vec<AudioSample>],
        aec_enabled: bool,
    ) -> Result<Vec<Vec<AudioSample>>, NodeError> {
        let processor = self.processor.as_mut().ok_or(NodeError::NotStarted)?;
        let agc_target = self.config.agc_target();
        let frame_len = self.config.frames_per_apm_frame().max(1);
        let total = channels.first().map(Vec::len).unwrap_or(0);

        let mut output = vec![Vec::with_capacity(total); channels.len()];
        let mut start = 0;

        while start < total {
            let end = (start + frame_len).min(total);
            let frame: Vec<Vec<AudioSample>> =
                channels.iter().map(|c| c[start..end].to_vec()).collect();

            let processed = processor.process(&frame, aec_enabled, agc_target)?;

            if processed.len() != channels.len()
                || processed.iter().any(|c| c.len() != end - start)
            {
                return Err(ProcessorError::InvalidFrame(format!(
                    "processor returned {} channels for a {} channel frame of {} samples",
                    processed.len(),
                    channels.len(),
                    end - start
                ))
                .into());
            }

            for (out, chunk) in output.iter_mut().zip(processed) {
                out.extend(chunk);
            }
            start = end;
        }

        Ok(output)
    }

    /// Run every beam through its detector.
    fn run_detectors(
        &mut self,
        processed: &[Vec<AudioSample>],
        cycle_start: Duration,
    ) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        for (beam, detector) in self.detectors.iter_mut().enumerate() {
            let Some(samples) = processed.get(beam) else {
                break;
            };

            match detector.detect(samples) {
                Ok(Some(detection)) => {
                    debug!(
                        "Beam {} triggered: score={:.3}",
                        beam, detection.score
                    );
                    events.push(TriggerEvent {
                        beam,
                        score: detection.score,
                        begin_sample: detection.begin_sample,
                        end_sample: detection.end_sample,
                        block_timestamp: cycle_start,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Detector on beam {} failed, skipping: {}", beam, e);
                    self.stats.detector_errors += 1;
                }
            }
        }

        events
    }

    fn commit(&mut self, beam: BeamId, score: f32) -> Result<(), NodeError> {
        let direction = resolve_direction(beam, self.config.mic0_angle_offset, self.config.num_beams)?;
        self.store.commit(beam, direction, score);
        self.last_picked_beam = Some(beam);
        self.stats.detections_confirmed += 1;

        info!(
            "Hotword detected! beam={}, direction={}, score={:.3}",
            beam, direction, score
        );

        if self.config.auto_state_transfer {
            let state = self.chain_state.get();
            self.chain_state.set(state.after_trigger());
        }

        Ok(())
    }

    fn build_output(
        &self,
        mut processed: Vec<Vec<AudioSample>>,
        cycle_start: Duration,
    ) -> Result<AudioBlock, NodeError> {
        let channels = match self.config.output_channels {
            OutputChannels::All => processed,
            OutputChannels::PickedBeam => {
                let picked = self
                    .last_picked_beam
                    .unwrap_or_else(|| self.config.reference_channel());
                vec![processed.swap_remove(picked)]
            }
        };

        Ok(AudioBlock::from_channels(
            &channels,
            self.config.output_layout,
            cycle_start,
        )?)
    }
}

impl BlockNode for DoaKwsNode {
    type Error = NodeError;

    fn on_start_thread(&mut self) -> Result<(), NodeError> {
        if self.started {
            warn!("Node already started");
            return Ok(());
        }

        self.config.validate()?;

        let channels = self.config.input_channels();

        if self.processor.is_none() {
            self.processor = Some(
                self.factory
                    .create_processor(channels, self.config.sample_rate)?,
            );
        }

        for beam in self.detectors.len()..self.config.num_beams {
            let mut detector = self
                .factory
                .create_detector(beam)
                .map_err(|source| NodeError::Detector { beam, source })?;

            detector
                .load_model(&self.config.model_path)
                .map_err(|source| NodeError::Detector { beam, source })?;

            self.detectors.push(detector);
        }

        self.accumulator = Some(BlockAccumulator::new(
            channels,
            self.config.frames_per_block(),
            self.config.underclocking_count,
        ));
        self.aggregator = TriggerAggregator::new(aggregator_config(&self.config));
        self.started = true;

        info!(
            "DOA/KWS node started: {} detectors, {} input channels",
            self.detectors.len(),
            channels
        );

        Ok(())
    }

    fn process_block(&mut self, block: AudioBlock) -> Result<Option<AudioBlock>, NodeError> {
        if !self.started {
            return Err(NodeError::NotStarted);
        }

        self.stats.blocks_received += 1;

        if let Err(e) = self.check_block(&block) {
            warn!("Dropping block: {}", e);
            self.stats.blocks_dropped += 1;
            return Ok(None);
        }

        let accumulator = self.accumulator.as_mut().ok_or(NodeError::NotStarted)?;
        let Some((channels, cycle_start)) = accumulator.push(block.to_channels(), block.timestamp())
        else {
            trace!(
                "Underclocking: {}/{} blocks gathered",
                accumulator.pending_blocks(),
                accumulator.blocks_per_cycle()
            );
            return Ok(None);
        };

        self.stats.cycles_run += 1;

        let chain_state = self.chain_state.get();
        let aec_enabled = !(chain_state.is_listen() && !self.config.do_aec_when_listen);

        let processed = match self.run_processor(&channels, aec_enabled) {
            Ok(processed) => processed,
            Err(e) => {
                error!("Audio processing failed, dropping cycle: {}", e);
                self.stats.processor_errors += 1;
                return Ok(None);
            }
        };

        let events = self.run_detectors(&processed, cycle_start);
        self.stats.triggers_seen += events.len() as u64;

        match self.aggregator.on_cycle(cycle_start, &events) {
            AggregatorOutcome::Confirmed { beam, score } => self.commit(beam, score)?,
            AggregatorOutcome::Discarded => self.stats.windows_discarded += 1,
            AggregatorOutcome::Suppressed { .. } => self.stats.fake_triggers_suppressed += 1,
            AggregatorOutcome::Idle | AggregatorOutcome::Triggering => {}
        }

        self.build_output(processed, cycle_start).map(Some)
    }

    fn on_join_thread(&mut self) -> Result<(), NodeError> {
        let detectors = self.detectors.len();
        self.detectors.clear();

        let had_processor = self.processor.take().is_some();

        if let Some(mut accumulator) = self.accumulator.take() {
            accumulator.clear();
        }
        self.aggregator.reset();

        if self.started || detectors > 0 || had_processor {
            info!(
                "DOA/KWS node released {} detectors{}",
                detectors,
                if had_processor { " and the audio processor" } else { "" }
            );
        }
        self.started = false;

        debug!("Final node stats: {:?}", self.stats);
        Ok(())
    }
}

impl DirectionReporter for DoaKwsNode {
    fn get_direction(&self) -> u16 {
        self.store.get_direction()
    }
}

impl HotwordReporter for DoaKwsNode {
    fn hotword_detected(&self) -> bool {
        self.store.hotword_detected()
    }
}
