/// Trigger aggregation
///
/// Beams rarely fire on the same block: beamforming artifacts spread one
/// utterance over a few blocks. The aggregator opens a confirmation window on
/// the first trigger, lets the other beams vote until the window's deadline,
/// and then names a single winner (highest score, lowest index on ties).
///
/// ```text
///  Idle ──first event──▶ Triggering ──deadline──▶ Confirmed ─┐
///   ▲                        │                               │
///   │                        ├──deadline, no beams──▶ Discarded
///   │                        └──deadline, lone beam──▶ Suppressed
///   └────────────────────────────────────────────────────────┘
/// ```

use crate::config::FakeTriggerConfig;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Index of a beam; `num_beams` itself is the reference channel
pub type BeamId = usize;

/// A trigger reported by one beam's detector for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    pub beam: BeamId,

    /// Detector confidence; higher wins
    pub score: f32,

    /// Offsets of the phrase inside the beam's buffer
    pub begin_sample: u64,
    pub end_sample: u64,

    /// Stream time of the cycle the trigger came from
    pub block_timestamp: Duration,
}

/// Best score seen per beam during one window.
///
/// Only beams that fired have an entry, so the key set doubles as the
/// window's `beams_fired`.
#[derive(Debug, Clone)]
pub struct BeamScoreTable {
    scores: Vec<Option<f32>>,
}

impl BeamScoreTable {
    pub fn new(num_beams: usize) -> Self {
        Self {
            scores: vec![None; num_beams],
        }
    }

    /// Record a score, keeping the maximum per beam. Returns false for a
    /// beam outside the table.
    pub fn record(&mut self, beam: BeamId, score: f32) -> bool {
        match self.scores.get_mut(beam) {
            Some(slot) => {
                *slot = Some(match *slot {
                    Some(best) if best.total_cmp(&score).is_ge() => best,
                    _ => score,
                });
                true
            }
            None => false,
        }
    }

    pub fn score(&self, beam: BeamId) -> Option<f32> {
        self.scores.get(beam).copied().flatten()
    }

    /// Beams that fired, in index order
    pub fn beams_fired(&self) -> impl Iterator<Item = BeamId> + '_ {
        self.scores
            .iter()
            .enumerate()
            .filter_map(|(beam, score)| score.map(|_| beam))
    }

    pub fn fired_count(&self) -> usize {
        self.scores.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.fired_count() == 0
    }

    /// Highest-scoring beam; the lower index wins a tie.
    pub fn best(&self) -> Option<(BeamId, f32)> {
        let mut best: Option<(BeamId, f32)> = None;

        for (beam, score) in self
            .scores
            .iter()
            .enumerate()
            .filter_map(|(beam, score)| score.map(|s| (beam, s)))
        {
            match best {
                Some((_, top)) if score.total_cmp(&top).is_le() => {}
                _ => best = Some((beam, score)),
            }
        }

        best
    }
}

/// Aggregator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// No window open
    Idle,

    /// Window open, collecting votes
    Triggering,
}

/// What a cycle did to the aggregator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregatorOutcome {
    /// Nothing happened
    Idle,

    /// A window is open (possibly opened this cycle)
    Triggering,

    /// The window closed with a winner
    Confirmed { beam: BeamId, score: f32 },

    /// The window reached its deadline with no fired beams
    Discarded,

    /// The window held a lone, uncorroborated trigger
    Suppressed { beam: BeamId },
}

/// Aggregator tuning, usually taken from `NodeConfig`
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub num_beams: usize,
    pub post_confirm_threshold: Duration,
    pub post_decision_holdoff: Duration,
    pub fake_trigger: FakeTriggerConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            num_beams: 6,
            post_confirm_threshold: Duration::from_millis(300),
            post_decision_holdoff: Duration::ZERO,
            fake_trigger: FakeTriggerConfig::default(),
        }
    }
}

/// An open confirmation window. The deadline is fixed when it opens.
#[derive(Debug, Clone)]
struct TriggerWindow {
    start: Duration,
    deadline: Duration,
    table: BeamScoreTable,
}

/// Bookkeeping for lone-trigger suppression
#[derive(Debug, Clone)]
struct FakeTriggerState {
    /// Consecutive cycles without a trigger, per beam
    silent_cycles: Vec<u32>,
    last_fake_trigger_time: Option<Duration>,
}

impl FakeTriggerState {
    fn new(num_beams: usize) -> Self {
        Self {
            silent_cycles: vec![0; num_beams],
            last_fake_trigger_time: None,
        }
    }

    /// Shortest silent streak among every beam except `beam`
    fn others_silent_cycles(&self, beam: BeamId) -> Option<u32> {
        self.silent_cycles
            .iter()
            .enumerate()
            .filter(|&(other, _)| other != beam)
            .map(|(_, &cycles)| cycles)
            .min()
    }
}

/// Confirmation-window state machine. Owned by the worker thread.
pub struct TriggerAggregator {
    config: AggregatorConfig,
    window: Option<TriggerWindow>,
    fake: FakeTriggerState,
    last_confirmed_at: Option<Duration>,
}

impl TriggerAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        debug!(
            "Initializing trigger aggregator: {} beams, {:?} post-confirm window",
            config.num_beams, config.post_confirm_threshold
        );

        Self {
            fake: FakeTriggerState::new(config.num_beams),
            config,
            window: None,
            last_confirmed_at: None,
        }
    }

    pub fn state(&self) -> AggregatorState {
        if self.window.is_some() {
            AggregatorState::Triggering
        } else {
            AggregatorState::Idle
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Takes effect from the next window; an open window keeps its deadline.
    pub fn set_post_confirm_threshold(&mut self, threshold: Duration) {
        self.config.post_confirm_threshold = threshold;
    }

    /// Stream time of the last suppressed lone trigger
    pub fn last_fake_trigger_time(&self) -> Option<Duration> {
        self.fake.last_fake_trigger_time
    }

    /// Consecutive cycles `beam` has gone without a trigger
    pub fn silent_cycles(&self, beam: BeamId) -> Option<u32> {
        self.fake.silent_cycles.get(beam).copied()
    }

    /// Score table of the open window, if any
    pub fn window_scores(&self) -> Option<&BeamScoreTable> {
        self.window.as_ref().map(|w| &w.table)
    }

    /// Advance the state machine by one processing cycle.
    ///
    /// `now` is the stream time of the cycle; `events` are the triggers the
    /// beams reported for it, in any order. Call this every cycle, including
    /// those without events, so deadlines are noticed.
    pub fn on_cycle(&mut self, now: Duration, events: &[TriggerEvent]) -> AggregatorOutcome {
        let mut fired = vec![false; self.config.num_beams];

        for event in events {
            if event.beam >= self.config.num_beams {
                warn!(
                    "Ignoring trigger from beam {} (only {} beams)",
                    event.beam, self.config.num_beams
                );
                continue;
            }
            fired[event.beam] = true;

            if self.window.is_none() && self.in_post_decision_holdoff(now) {
                debug!("Ignoring trigger from beam {} during hold-off", event.beam);
                continue;
            }

            let num_beams = self.config.num_beams;
            let threshold = self.config.post_confirm_threshold;
            let window = self.window.get_or_insert_with(|| {
                debug!(
                    "Aggregator: Idle -> Triggering (beam {} at {:?})",
                    event.beam, event.block_timestamp
                );
                TriggerWindow {
                    start: event.block_timestamp,
                    deadline: event.block_timestamp + threshold,
                    table: BeamScoreTable::new(num_beams),
                }
            });

            trace!(
                "Trigger: beam={}, score={:.3}, span={}..{}",
                event.beam,
                event.score,
                event.begin_sample,
                event.end_sample
            );
            window.table.record(event.beam, event.score);
        }

        for (silent, fired) in self.fake.silent_cycles.iter_mut().zip(fired) {
            *silent = if fired { 0 } else { silent.saturating_add(1) };
        }

        let deadline_reached = self
            .window
            .as_ref()
            .map(|w| now >= w.deadline)
            .unwrap_or(false);

        if !deadline_reached {
            return match self.window {
                Some(_) => AggregatorOutcome::Triggering,
                None => AggregatorOutcome::Idle,
            };
        }

        match self.window.take() {
            Some(window) => self.resolve(now, window),
            None => AggregatorOutcome::Idle,
        }
    }

    /// Drop any open window and forget suppression history
    pub fn reset(&mut self) {
        self.window = None;
        self.fake = FakeTriggerState::new(self.config.num_beams);
        self.last_confirmed_at = None;
        debug!("Aggregator reset");
    }

    fn resolve(&mut self, now: Duration, window: TriggerWindow) -> AggregatorOutcome {
        // Windows only open on an accepted trigger, so an empty table is
        // not expected here
        let Some((beam, score)) = window.table.best() else {
            debug!(
                "Aggregator: Triggering -> Discarded (no beams fired since {:?})",
                window.start
            );
            return AggregatorOutcome::Discarded;
        };

        if self.is_fake_trigger(now, beam, &window.table) {
            info!(
                "Suppressed lone trigger on beam {} (score {:.3}, other beams silent for {} cycles)",
                beam,
                score,
                self.fake.others_silent_cycles(beam).unwrap_or(0)
            );
            self.fake.last_fake_trigger_time = Some(now);
            return AggregatorOutcome::Suppressed { beam };
        }

        debug!(
            "Aggregator: Triggering -> Confirmed (beam {}, score {:.3}, {} beams voted)",
            beam,
            score,
            window.table.fired_count()
        );
        self.last_confirmed_at = Some(now);

        AggregatorOutcome::Confirmed { beam, score }
    }

    fn is_fake_trigger(&self, now: Duration, beam: BeamId, table: &BeamScoreTable) -> bool {
        let fake = &self.config.fake_trigger;
        if !fake.enabled || table.fired_count() != 1 {
            return false;
        }

        let holdoff = Duration::from_millis(fake.holdoff_after_fake_ms);
        let recently_suppressed = self
            .fake
            .last_fake_trigger_time
            .map(|t| now.saturating_sub(t) < holdoff)
            .unwrap_or(false);

        // A single-beam array has no neighbour to corroborate with
        let others_quiet = self
            .fake
            .others_silent_cycles(beam)
            .map(|cycles| cycles > fake.non_trigger_streak_threshold)
            .unwrap_or(false);

        recently_suppressed || others_quiet
    }

    fn in_post_decision_holdoff(&self, now: Duration) -> bool {
        self.last_confirmed_at
            .map(|t| now.saturating_sub(t) < self.config.post_decision_holdoff)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BLOCK: Duration = Duration::from_millis(10);

    fn event(beam: BeamId, score: f32, at_ms: u64) -> TriggerEvent {
        TriggerEvent {
            beam,
            score,
            begin_sample: 0,
            end_sample: 160,
            block_timestamp: Duration::from_millis(at_ms),
        }
    }

    fn aggregator(num_beams: usize, threshold_ms: u64) -> TriggerAggregator {
        TriggerAggregator::new(AggregatorConfig {
            num_beams,
            post_confirm_threshold: Duration::from_millis(threshold_ms),
            ..Default::default()
        })
    }

    /// Feed `events` at their timestamps, stepping in 10 ms cycles until
    /// `until_ms`, and return the first terminal outcome.
    fn run(
        agg: &mut TriggerAggregator,
        events: &[TriggerEvent],
        until_ms: u64,
    ) -> Option<AggregatorOutcome> {
        let mut now = Duration::ZERO;
        while now <= Duration::from_millis(until_ms) {
            let due: Vec<_> = events
                .iter()
                .copied()
                .filter(|e| e.block_timestamp == now)
                .collect();

            match agg.on_cycle(now, &due) {
                AggregatorOutcome::Idle | AggregatorOutcome::Triggering => {}
                terminal => return Some(terminal),
            }
            now += BLOCK;
        }
        None
    }

    #[test]
    fn test_score_table_keeps_max_per_beam() {
        let mut table = BeamScoreTable::new(3);
        assert!(table.record(1, 0.4));
        assert!(table.record(1, 0.9));
        assert!(table.record(1, 0.6));
        assert!(!table.record(3, 1.0));

        assert_relative_eq!(table.score(1).unwrap(), 0.9);
        assert_eq!(table.score(0), None);
        assert_eq!(table.beams_fired().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_score_table_tie_prefers_lower_beam() {
        let mut table = BeamScoreTable::new(4);
        table.record(3, 0.7);
        table.record(1, 0.7);
        table.record(2, 0.5);

        assert_eq!(table.best(), Some((1, 0.7)));
    }

    #[test]
    fn test_idle_without_events() {
        let mut agg = aggregator(3, 200);
        assert_eq!(agg.on_cycle(Duration::ZERO, &[]), AggregatorOutcome::Idle);
        assert_eq!(agg.state(), AggregatorState::Idle);
    }

    #[test]
    fn test_confirm_after_threshold() {
        let mut agg = aggregator(3, 200);

        // Beam 2 fires first, beam 0 corroborates with a better score
        let events = [event(2, 0.8, 0), event(0, 0.9, 50)];
        let mut now = Duration::ZERO;
        let mut outcome = AggregatorOutcome::Idle;

        while now < Duration::from_millis(200) {
            let due: Vec<_> = events
                .iter()
                .copied()
                .filter(|e| e.block_timestamp == now)
                .collect();
            outcome = agg.on_cycle(now, &due);
            assert_eq!(outcome, AggregatorOutcome::Triggering);
            now += BLOCK;
        }

        let scores = agg.window_scores().unwrap();
        assert_eq!(scores.beams_fired().collect::<Vec<_>>(), vec![0, 2]);

        outcome = agg.on_cycle(now, &[]);
        assert_eq!(outcome, AggregatorOutcome::Confirmed { beam: 0, score: 0.9 });
        assert_eq!(agg.state(), AggregatorState::Idle);
    }

    #[test]
    fn test_winner_is_order_independent() {
        let events = [
            event(0, 0.6, 0),
            event(1, 0.95, 0),
            event(2, 0.95, 0),
            event(3, 0.3, 0),
            event(1, 0.5, 0),
        ];

        // Every rotation and the reverse, all placed in the same cycle
        let mut orders: Vec<Vec<TriggerEvent>> = (0..events.len())
            .map(|r| {
                let mut v = events.to_vec();
                v.rotate_left(r);
                v
            })
            .collect();
        let mut reversed = events.to_vec();
        reversed.reverse();
        orders.push(reversed);

        for order in orders {
            let mut agg = aggregator(4, 0);
            let outcome = agg.on_cycle(Duration::ZERO, &order);
            assert_eq!(outcome, AggregatorOutcome::Confirmed { beam: 1, score: 0.95 });
        }
    }

    #[test]
    fn test_zero_threshold_confirms_same_cycle() {
        let mut agg = aggregator(3, 0);
        let outcome = agg.on_cycle(Duration::from_millis(40), &[event(2, 0.5, 40)]);
        assert_eq!(outcome, AggregatorOutcome::Confirmed { beam: 2, score: 0.5 });
    }

    #[test]
    fn test_invalid_beam_never_opens_window() {
        let mut agg = aggregator(3, 100);
        let outcome = run(&mut agg, &[event(3, 1.0, 0), event(7, 1.0, 10)], 300);

        assert_eq!(outcome, None);
        assert_eq!(agg.state(), AggregatorState::Idle);
    }

    #[test]
    fn test_windows_are_sequential() {
        let mut agg = aggregator(3, 50);

        // Beam 1 fires inside the first window, beam 2 after it closed
        let events = [event(0, 0.4, 0), event(1, 0.3, 30), event(2, 0.9, 60)];

        let first = run(&mut agg, &events, 50);
        assert_eq!(first, Some(AggregatorOutcome::Confirmed { beam: 0, score: 0.4 }));

        let second = agg.on_cycle(Duration::from_millis(60), &[events[2]]);
        assert_eq!(second, AggregatorOutcome::Triggering);
        let second = agg.on_cycle(Duration::from_millis(110), &[]);
        assert_eq!(second, AggregatorOutcome::Confirmed { beam: 2, score: 0.9 });
    }

    #[test]
    fn test_post_decision_holdoff_drops_stragglers() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 3,
            post_confirm_threshold: Duration::ZERO,
            post_decision_holdoff: Duration::from_millis(500),
            ..Default::default()
        });

        let first = agg.on_cycle(Duration::ZERO, &[event(0, 0.9, 0)]);
        assert!(matches!(first, AggregatorOutcome::Confirmed { beam: 0, .. }));

        let straggler = agg.on_cycle(Duration::from_millis(100), &[event(1, 0.8, 100)]);
        assert_eq!(straggler, AggregatorOutcome::Idle);

        let later = agg.on_cycle(Duration::from_millis(600), &[event(1, 0.8, 600)]);
        assert!(matches!(later, AggregatorOutcome::Confirmed { beam: 1, .. }));
    }

    #[test]
    fn test_lone_trigger_suppressed() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 3,
            post_confirm_threshold: Duration::from_millis(200),
            fake_trigger: FakeTriggerConfig {
                enabled: true,
                non_trigger_streak_threshold: 5,
                holdoff_after_fake_ms: 0,
            },
            ..Default::default()
        });

        let outcome = run(&mut agg, &[event(1, 0.99, 0)], 400);
        assert_eq!(outcome, Some(AggregatorOutcome::Suppressed { beam: 1 }));
        assert_eq!(agg.last_fake_trigger_time(), Some(Duration::from_millis(200)));
        assert_eq!(agg.state(), AggregatorState::Idle);
    }

    #[test]
    fn test_repeating_lone_trigger_suppressed() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 3,
            post_confirm_threshold: Duration::from_millis(100),
            fake_trigger: FakeTriggerConfig {
                enabled: true,
                non_trigger_streak_threshold: 5,
                holdoff_after_fake_ms: 0,
            },
            ..Default::default()
        });

        // Beam 1 keeps firing but its neighbours never join in
        let events: Vec<_> = (0..=100).step_by(30).map(|t| event(1, 0.7, t)).collect();
        let outcome = run(&mut agg, &events, 300);
        assert_eq!(outcome, Some(AggregatorOutcome::Suppressed { beam: 1 }));
        assert_eq!(agg.silent_cycles(0), Some(11));
        assert_eq!(agg.silent_cycles(1), Some(1));
    }

    #[test]
    fn test_late_second_beam_prevents_suppression() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 3,
            post_confirm_threshold: Duration::from_millis(100),
            fake_trigger: FakeTriggerConfig {
                enabled: true,
                non_trigger_streak_threshold: 5,
                holdoff_after_fake_ms: 0,
            },
            ..Default::default()
        });

        let outcome = run(&mut agg, &[event(1, 0.7, 0), event(2, 0.4, 90)], 300);
        assert_eq!(outcome, Some(AggregatorOutcome::Confirmed { beam: 1, score: 0.7 }));
    }

    #[test]
    fn test_lone_trigger_after_recent_neighbour_activity_confirmed() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 2,
            post_confirm_threshold: Duration::from_millis(50),
            fake_trigger: FakeTriggerConfig {
                enabled: true,
                non_trigger_streak_threshold: 20,
                holdoff_after_fake_ms: 0,
            },
            ..Default::default()
        });

        let first = run(&mut agg, &[event(0, 0.5, 0), event(1, 0.6, 0)], 50);
        assert_eq!(first, Some(AggregatorOutcome::Confirmed { beam: 1, score: 0.6 }));

        // Beam 1 was heard a few cycles ago, within the streak threshold
        agg.on_cycle(Duration::from_millis(60), &[event(0, 0.8, 60)]);
        let second = agg.on_cycle(Duration::from_millis(110), &[]);
        assert_eq!(second, AggregatorOutcome::Confirmed { beam: 0, score: 0.8 });
    }

    #[test]
    fn test_corroborated_trigger_not_suppressed() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 3,
            post_confirm_threshold: Duration::from_millis(200),
            fake_trigger: FakeTriggerConfig {
                enabled: true,
                non_trigger_streak_threshold: 0,
                holdoff_after_fake_ms: 0,
            },
            ..Default::default()
        });

        let outcome = run(&mut agg, &[event(1, 0.6, 0), event(2, 0.5, 10)], 400);
        assert_eq!(outcome, Some(AggregatorOutcome::Confirmed { beam: 1, score: 0.6 }));
    }

    #[test]
    fn test_holdoff_after_fake_suppresses_next_lone_window() {
        let mut agg = TriggerAggregator::new(AggregatorConfig {
            num_beams: 3,
            post_confirm_threshold: Duration::from_millis(50),
            fake_trigger: FakeTriggerConfig {
                enabled: true,
                non_trigger_streak_threshold: 20,
                holdoff_after_fake_ms: 1000,
            },
            ..Default::default()
        });

        // Lone beam 2 after 30 quiet cycles
        let first = run(&mut agg, &[event(2, 0.9, 300)], 350);
        assert_eq!(first, Some(AggregatorOutcome::Suppressed { beam: 2 }));

        // Beams 0 and 1 corroborate each other
        agg.on_cycle(Duration::from_millis(360), &[event(0, 0.7, 360), event(1, 0.6, 360)]);
        let second = agg.on_cycle(Duration::from_millis(410), &[]);
        assert_eq!(second, AggregatorOutcome::Confirmed { beam: 0, score: 0.7 });

        // Beam 0 alone; beam 1 was heard recently so the streak alone would
        // confirm it, but the window closes inside the hold-off
        agg.on_cycle(Duration::from_millis(420), &[event(0, 0.9, 420)]);
        let third = agg.on_cycle(Duration::from_millis(470), &[]);
        assert_eq!(third, AggregatorOutcome::Suppressed { beam: 0 });
    }

    #[test]
    fn test_fake_suppression_disabled_confirms_lone_trigger() {
        let mut agg = aggregator(3, 200);
        let outcome = run(&mut agg, &[event(1, 0.99, 0)], 400);
        assert_eq!(outcome, Some(AggregatorOutcome::Confirmed { beam: 1, score: 0.99 }));
    }

    #[test]
    fn test_silent_cycles_tracked_per_beam() {
        let mut agg = aggregator(3, 1000);
        agg.on_cycle(Duration::ZERO, &[event(0, 0.5, 0)]);
        assert_eq!(agg.silent_cycles(0), Some(0));
        assert_eq!(agg.silent_cycles(1), Some(1));

        for i in 1..=4 {
            agg.on_cycle(BLOCK * i, &[]);
        }
        assert_eq!(agg.silent_cycles(0), Some(4));
        assert_eq!(agg.silent_cycles(2), Some(5));

        agg.on_cycle(BLOCK * 5, &[event(1, 0.5, 50)]);
        assert_eq!(agg.silent_cycles(0), Some(5));
        assert_eq!(agg.silent_cycles(1), Some(0));
        assert_eq!(agg.silent_cycles(3), None);
    }

    #[test]
    fn test_threshold_change_keeps_open_window_deadline() {
        let mut agg = aggregator(3, 300);
        agg.on_cycle(Duration::ZERO, &[event(0, 0.9, 0)]);

        agg.set_post_confirm_threshold(Duration::from_millis(50));
        let outcome = agg.on_cycle(Duration::from_millis(60), &[]);
        assert_eq!(outcome, AggregatorOutcome::Triggering);

        let outcome = agg.on_cycle(Duration::from_millis(300), &[]);
        assert_eq!(outcome, AggregatorOutcome::Confirmed { beam: 0, score: 0.9 });

        // The next window uses the new threshold
        agg.on_cycle(Duration::from_millis(400), &[event(1, 0.8, 400)]);
        let outcome = agg.on_cycle(Duration::from_millis(450), &[]);
        assert_eq!(outcome, AggregatorOutcome::Confirmed { beam: 1, score: 0.8 });
    }

    #[test]
    fn test_window_opens_at_event_timestamp() {
        let mut agg = aggregator(3, 50);

        // Event stamped earlier than the cycle that delivers it
        let outcome = agg.on_cycle(Duration::from_millis(100), &[event(2, 0.6, 80)]);
        assert_eq!(outcome, AggregatorOutcome::Triggering);

        let outcome = agg.on_cycle(Duration::from_millis(130), &[]);
        assert_eq!(outcome, AggregatorOutcome::Confirmed { beam: 2, score: 0.6 });
    }

    #[test]
    fn test_empty_window_discarded() {
        let mut agg = aggregator(3, 50);
        let window = TriggerWindow {
            start: Duration::ZERO,
            deadline: Duration::from_millis(50),
            table: BeamScoreTable::new(3),
        };

        assert_eq!(
            agg.resolve(Duration::from_millis(50), window),
            AggregatorOutcome::Discarded
        );
        assert_eq!(agg.last_fake_trigger_time(), None);
    }

    #[test]
    fn test_reset_closes_window() {
        let mut agg = aggregator(3, 1000);
        agg.on_cycle(Duration::ZERO, &[event(0, 0.5, 0)]);
        assert_eq!(agg.state(), AggregatorState::Triggering);

        agg.reset();
        assert_eq!(agg.state(), AggregatorState::Idle);
        assert!(agg.window_scores().is_none());
    }
}
