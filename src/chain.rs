/// Chain node contracts and the shared chain state
///
/// A node in the processing chain is driven by one worker thread through
/// `BlockNode`. Nodes that locate or detect something additionally expose
/// `DirectionReporter` / `HotwordReporter`, which any thread may call.

use crate::audio_block::AudioBlock;
use cache_padded::CachePadded;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs inside a block-processing pipeline on a dedicated worker.
pub trait BlockNode: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Acquire resources. Called on the worker before the first block.
    fn on_start_thread(&mut self) -> Result<(), Self::Error>;

    /// Process one upstream block. `Ok(None)` means nothing to pass down
    /// for this block.
    fn process_block(&mut self, block: AudioBlock) -> Result<Option<AudioBlock>, Self::Error>;

    /// Release whatever `on_start_thread` acquired. Must be idempotent.
    fn on_join_thread(&mut self) -> Result<(), Self::Error>;
}

/// Reports the direction of the last confirmed detection.
pub trait DirectionReporter {
    /// Degrees in `[0, 360)`
    fn get_direction(&self) -> u16;
}

/// Reports whether a hotword has been confirmed.
pub trait HotwordReporter {
    fn hotword_detected(&self) -> bool;
}

/// Higher-level state of the audio chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChainState {
    /// Waiting for the hotword, nothing playing
    #[default]
    WaitTriggerQuietly = 0,

    /// Waiting for the hotword while playback is running
    WaitTriggerWithBgm = 1,

    /// Capturing a request, nothing playing
    ListenQuietly = 2,

    /// Capturing a request while playback is running
    ListenWithBgm = 3,
}

impl ChainState {
    pub fn is_listen(self) -> bool {
        matches!(self, ChainState::ListenQuietly | ChainState::ListenWithBgm)
    }

    /// The listen state entered from this state on a detection
    pub fn after_trigger(self) -> ChainState {
        match self {
            ChainState::WaitTriggerQuietly => ChainState::ListenQuietly,
            ChainState::WaitTriggerWithBgm => ChainState::ListenWithBgm,
            listening => listening,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ChainState::WaitTriggerWithBgm,
            2 => ChainState::ListenQuietly,
            3 => ChainState::ListenWithBgm,
            _ => ChainState::WaitTriggerQuietly,
        }
    }
}

/// Shared handle to the chain state.
///
/// The worker reads it every cycle; callers set it from any thread when
/// automatic transfer is disabled (or to return to a wait state).
#[derive(Debug, Clone)]
pub struct ChainStateHandle {
    state: Arc<CachePadded<AtomicU8>>,
}

impl ChainStateHandle {
    pub fn new(initial: ChainState) -> Self {
        Self {
            state: Arc::new(CachePadded::new(AtomicU8::new(initial as u8))),
        }
    }

    pub fn get(&self) -> ChainState {
        ChainState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ChainState) {
        let previous = ChainState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("Chain state: {:?} -> {:?}", previous, state);
        }
    }
}

impl Default for ChainStateHandle {
    fn default() -> Self {
        Self::new(ChainState::default())
    }
}
