/// Block pipeline
///
/// Drives one `BlockNode` on a dedicated worker thread: start-up, the block
/// loop between an upstream `BlockSource` and a downstream `BlockSink`, and
/// shutdown once the exit flag is raised or upstream ends.

use crate::audio_block::AudioBlock;
use crate::chain::BlockNode;
use crate::source::SourceError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError<E: std::error::Error + Send + Sync + 'static> {
    #[error("Node failed to start: {0}")]
    Startup(#[source] E),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker thread panicked")]
    WorkerPanicked,
}

/// Upstream end of a pipeline.
pub trait BlockSource: Send {
    /// Next block, or `Ok(None)` once upstream has finished.
    fn next_block(&mut self) -> Result<Option<AudioBlock>, SourceError>;
}

/// Downstream end of a pipeline.
pub trait BlockSink: Send {
    /// Hand a block downstream. Returns false once downstream is gone.
    fn accept(&mut self, block: AudioBlock) -> bool;
}

impl BlockSource for mpsc::Receiver<AudioBlock> {
    fn next_block(&mut self) -> Result<Option<AudioBlock>, SourceError> {
        Ok(self.recv().ok())
    }
}

impl BlockSink for mpsc::Sender<AudioBlock> {
    fn accept(&mut self, block: AudioBlock) -> bool {
        self.send(block).is_ok()
    }
}

impl BlockSink for tokio::sync::mpsc::UnboundedSender<AudioBlock> {
    fn accept(&mut self, block: AudioBlock) -> bool {
        self.send(block).is_ok()
    }
}

/// Drops everything; for nodes at the end of a chain
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BlockSink for NullSink {
    fn accept(&mut self, _block: AudioBlock) -> bool {
        true
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Spawn the worker and wait for the node to start.
    ///
    /// A node that fails to start has already been shut down (releasing
    /// whatever it did acquire) when this returns the error.
    pub fn spawn<N, S, K>(
        mut node: N,
        mut source: S,
        mut sink: K,
        exit: Arc<AtomicBool>,
    ) -> Result<PipelineHandle<N>, PipelineError<N::Error>>
    where
        N: BlockNode + 'static,
        S: BlockSource + 'static,
        K: BlockSink + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker_exit = exit.clone();

        let worker = thread::Builder::new()
            .name("doa-kws-worker".to_string())
            .spawn(move || {
                if let Err(e) = node.on_start_thread() {
                    error!("Node start-up failed: {}", e);
                    if let Err(e) = node.on_join_thread() {
                        warn!("Shutdown after failed start-up failed: {}", e);
                    }
                    let _ = ready_tx.send(Err(e));
                    return node;
                }

                let _ = ready_tx.send(Ok(()));
                run_loop(&mut node, &mut source, &mut sink, &worker_exit);

                if let Err(e) = node.on_join_thread() {
                    error!("Node shutdown failed: {}", e);
                }
                node
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Pipeline worker running");
                Ok(PipelineHandle { worker, exit })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(PipelineError::Startup(e))
            }
            Err(_) => {
                let _ = worker.join();
                Err(PipelineError::WorkerPanicked)
            }
        }
    }
}

fn run_loop<N, S, K>(node: &mut N, source: &mut S, sink: &mut K, exit: &AtomicBool)
where
    N: BlockNode,
    S: BlockSource,
    K: BlockSink,
{
    let mut downstream_open = true;

    loop {
        if exit.load(Ordering::Acquire) {
            info!("Exit requested, stopping worker");
            break;
        }

        let block = match source.next_block() {
            Ok(Some(block)) => block,
            Ok(None) => {
                info!("Upstream finished, stopping worker");
                break;
            }
            Err(e) => {
                error!("Upstream failed, stopping worker: {}", e);
                break;
            }
        };

        match node.process_block(block) {
            Ok(Some(out)) => {
                if downstream_open && !sink.accept(out) {
                    warn!("Downstream closed, output is discarded from now on");
                    downstream_open = false;
                }
            }
            Ok(None) => {}
            Err(e) => error!("Block processing failed: {}", e),
        }
    }

    debug!("Worker loop exited");
}

/// Handle to a running pipeline worker.
pub struct PipelineHandle<N> {
    worker: JoinHandle<N>,
    exit: Arc<AtomicBool>,
}

impl<N: BlockNode> PipelineHandle<N> {
    /// Ask the worker to stop after the block it is on.
    pub fn stop(&self) {
        self.exit.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and take the node back, already shut down.
    pub fn join(self) -> Result<N, PipelineError<N::Error>> {
        self.worker.join().map_err(|_| PipelineError::WorkerPanicked)
    }
}
