/// Beam hotword service binary
///
/// Replays a multi-channel capture through the DOA/KWS node and logs every
/// confirmed hotword with its direction.

use anyhow::{bail, Context, Result};
use beam_hotword::{
    DirectionReporter, DoaKwsNode, HotwordReporter, NodeConfig, Pipeline, StandInEngines,
    WavFileSource,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("beam_hotword=debug".parse()?),
        )
        .init();

    info!("Starting beam hotword service");

    let config = load_config()?;
    let input = std::env::var("BEAM_HOTWORD_INPUT")
        .context("BEAM_HOTWORD_INPUT must point at a multi-channel WAV capture")?;

    let source = WavFileSource::open(&input, config.frames_per_block(), config.input_layout)
        .with_context(|| format!("Failed to open {}", input))?;

    if source.channels() != config.input_channels() {
        bail!(
            "{} has {} channels, expected {} beams plus the reference",
            input,
            source.channels(),
            config.num_beams
        );
    }
    if source.sample_rate() != config.sample_rate {
        warn!(
            "Capture is {} Hz but the node is configured for {} Hz",
            source.sample_rate(),
            config.sample_rate
        );
    }

    let node = DoaKwsNode::new(config, Box::new(StandInEngines::default()))
        .context("Failed to create node")?;
    let detections = node.detection_handle();

    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let exit = Arc::new(AtomicBool::new(false));

    let pipeline = Pipeline::spawn(node, source, output_tx, exit)
        .context("Failed to start pipeline")?;

    info!("Pipeline running. Listening for the hotword...");

    let drain = tokio::spawn(async move {
        let mut blocks = 0u64;
        while output_rx.recv().await.is_some() {
            blocks += 1;
        }
        blocks
    });

    let mut poll = tokio::time::interval(Duration::from_millis(50));

    // Event loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                pipeline.stop();
                break;
            }
            _ = poll.tick() => {
                if detections.hotword_detected() {
                    let decision = detections.snapshot();
                    info!(
                        "Hotword detected! direction={}, beam={}, score={:.2}",
                        detections.get_direction(),
                        decision.beam,
                        decision.score
                    );
                }

                if pipeline.is_finished() {
                    break;
                }
            }
        }
    }

    // Cleanup
    let node = tokio::task::spawn_blocking(move || pipeline.join())
        .await
        .context("Pipeline join task failed")??;

    match drain.await {
        Ok(blocks) => info!("Forwarded {} output blocks", blocks),
        Err(e) => error!("Output drain task failed: {}", e),
    }

    let last = detections.snapshot();
    if last.confirmed {
        info!(
            "Last decision: direction={}, beam={}, decision #{}",
            last.direction_degrees, last.beam, last.sequence
        );
    }

    info!("Final stats: {:?}", node.stats());
    info!("Beam hotword service stopped");

    Ok(())
}

/// Load configuration from a JSON file and environment overrides
fn load_config() -> Result<NodeConfig> {
    let mut config = match std::env::var("BEAM_HOTWORD_CONFIG") {
        Ok(path) => NodeConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => {
            info!("BEAM_HOTWORD_CONFIG not set, using defaults");
            NodeConfig::default()
        }
    };

    if let Ok(model) = std::env::var("BEAM_HOTWORD_MODEL") {
        config.model_path = model.into();
    }

    config.validate()?;
    Ok(config)
}
