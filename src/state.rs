/// Detection state store
///
/// The only state written by the worker and read by other threads. A
/// decision is committed as a whole under one lock, so readers never see a
/// beam from one cycle paired with a direction from another.

use crate::aggregator::BeamId;
use crate::chain::{DirectionReporter, HotwordReporter};
use crate::config::HotwordFlagMode;
use cache_padded::CachePadded;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// The externally visible result of the last confirmed cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectionDecision {
    /// False until the first confirmation
    pub confirmed: bool,

    pub beam: BeamId,

    /// Degrees in `[0, 360)`
    pub direction_degrees: u16,

    /// Score of the winning beam
    pub score: f32,

    /// Number of decisions committed so far, this one included
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    decision: DetectionDecision,
    hotword_raised: bool,
}

/// Holds the last committed `DetectionDecision`.
#[derive(Debug)]
pub struct DetectionStateStore {
    inner: CachePadded<Mutex<StoreInner>>,
    mode: HotwordFlagMode,
}

impl DetectionStateStore {
    pub fn new(mode: HotwordFlagMode) -> Self {
        Self {
            inner: CachePadded::new(Mutex::new(StoreInner::default())),
            mode,
        }
    }

    pub fn mode(&self) -> HotwordFlagMode {
        self.mode
    }

    /// Replace the current decision and raise the hotword flag.
    pub fn commit(&self, beam: BeamId, direction_degrees: u16, score: f32) -> DetectionDecision {
        let mut inner = self.inner.lock();

        let decision = DetectionDecision {
            confirmed: true,
            beam,
            direction_degrees,
            score,
            sequence: inner.decision.sequence + 1,
        };

        inner.decision = decision;
        inner.hotword_raised = true;
        drop(inner);

        debug!(
            "Committed decision #{}: beam={}, direction={}",
            decision.sequence, beam, direction_degrees
        );

        decision
    }

    /// Copy of the last committed decision
    pub fn snapshot(&self) -> DetectionDecision {
        self.inner.lock().decision
    }

    /// Direction of the last committed decision (0 before any)
    pub fn get_direction(&self) -> u16 {
        self.inner.lock().decision.direction_degrees
    }

    /// Whether a hotword has been confirmed.
    ///
    /// In `OneShot` mode a `true` result lowers the flag, so each committed
    /// decision is reported once across all readers. In `Sticky` mode the
    /// flag stays raised until `clear_hotword` is called.
    pub fn hotword_detected(&self) -> bool {
        let mut inner = self.inner.lock();
        let raised = inner.hotword_raised;

        if raised && self.mode == HotwordFlagMode::OneShot {
            inner.hotword_raised = false;
        }

        raised
    }

    /// Lower the hotword flag without touching the decision
    pub fn clear_hotword(&self) {
        self.inner.lock().hotword_raised = false;
    }
}

impl Default for DetectionStateStore {
    fn default() -> Self {
        Self::new(HotwordFlagMode::default())
    }
}

/// Cloneable read handle given to query threads.
#[derive(Debug, Clone)]
pub struct DetectionHandle {
    store: Arc<DetectionStateStore>,
}

impl DetectionHandle {
    pub fn new(store: Arc<DetectionStateStore>) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> DetectionDecision {
        self.store.snapshot()
    }

    pub fn clear_hotword(&self) {
        self.store.clear_hotword();
    }
}

impl DirectionReporter for DetectionHandle {
    fn get_direction(&self) -> u16 {
        self.store.get_direction()
    }
}

impl HotwordReporter for DetectionHandle {
    fn hotword_detected(&self) -> bool {
        self.store.hotword_detected()
    }
}
