//! The mirror loop service: owns the episode log and the policy table.
//!
//! One `MirrorLoop` is built per process (or per test) and shared behind an
//! `Arc`. Locking:
//! - the recorder sits behind a mutex; begin/complete are map operations;
//! - the policy table is an `Arc` swapped under a read-write lock, so readers
//!   never wait for an aggregation pass to finish computing;
//! - `pass_lock` serializes aggregation passes, making the running pass the
//!   only writer of the table.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::bucket::BucketKey;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, MirrorConfig};
use crate::domain::{dt_ms, Action, Episode, EpisodeId, FieldState, MirrorError, PolicyEntry};
use crate::policy_table::{HeatmapCell, PolicyTable, ReplaySummary};
use crate::recorder::{CompletionOutcome, EpisodeRecorder};
use crate::scheduler::AggregationSchedule;
use crate::selector::{Decision, FallbackPolicy, Participation, PolicySelector};
use crate::stats::{MirrorStats, TimeRange};

#[derive(Debug)]
pub struct MirrorLoop {
    config: MirrorConfig,
    clock: Arc<dyn Clock>,
    recorder: Mutex<EpisodeRecorder>,
    table: RwLock<Arc<PolicyTable>>,
    selector: Mutex<PolicySelector>,
    schedule: Mutex<AggregationSchedule>,
    /// Time of the last pass that ran.
    pass_lock: Mutex<Option<i64>>,
    last_bucket: Mutex<Option<BucketKey>>,
}

impl MirrorLoop {
    /// Build a loop on the wall clock.
    pub fn new(config: MirrorConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MirrorConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let recorder = EpisodeRecorder::new(config.recorder.clone(), config.reward.clone());
        let selector = PolicySelector::new(&config.selector);
        let schedule = AggregationSchedule::new(config.aggregation.interval_ms);
        Ok(Self {
            config,
            clock,
            recorder: Mutex::new(recorder),
            table: RwLock::new(Arc::new(PolicyTable::new())),
            selector: Mutex::new(selector),
            schedule: Mutex::new(schedule),
            pass_lock: Mutex::new(None),
            last_bucket: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // ------------------------------------------------------------------------
    // Episodes
    // ------------------------------------------------------------------------

    /// Open an episode. `Ok(None)` means the bucket is cooling down and
    /// nothing will be recorded.
    pub fn begin_episode(
        &self,
        pre: FieldState,
        action: Action,
    ) -> Result<Option<EpisodeId>, MirrorError> {
        let now = self.clock.now_ms();
        self.recorder.lock().begin(pre, action, now)
    }

    /// Close an episode. Stale and unknown ids are reported, never raised.
    pub fn complete_episode(
        &self,
        id: EpisodeId,
        post: FieldState,
    ) -> Result<CompletionOutcome, MirrorError> {
        let now = self.clock.now_ms();
        self.recorder.lock().complete(id, post, now)
    }

    pub fn episode_count(&self) -> usize {
        self.recorder.lock().log().len()
    }

    pub fn pending_episodes(&self) -> usize {
        self.recorder.lock().pending_len()
    }

    /// Newest first.
    pub fn recent_episodes(&self, limit: usize) -> Vec<Episode> {
        self.recorder.lock().log().recent(limit)
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    pub fn select_action(&self, state: &FieldState, fallback: &dyn FallbackPolicy) -> Decision {
        self.select_action_for(state, fallback, Participation::Active)
    }

    pub fn select_action_for(
        &self,
        state: &FieldState,
        fallback: &dyn FallbackPolicy,
        participation: Participation,
    ) -> Decision {
        let table = self.policy_snapshot();
        let decision = self
            .selector
            .lock()
            .select(&table, state, fallback, participation);
        *self.last_bucket.lock() = Some(decision.bucket_key.clone());
        decision
    }

    // ------------------------------------------------------------------------
    // Policy inspection
    // ------------------------------------------------------------------------

    /// Current table. Cheap; the returned snapshot never changes.
    pub fn policy_snapshot(&self) -> Arc<PolicyTable> {
        Arc::clone(&*self.table.read())
    }

    /// Entries of one bucket, best first.
    pub fn get_policy(&self, bucket_key: &BucketKey) -> Vec<PolicyEntry> {
        self.policy_snapshot().entries_for(bucket_key)
    }

    pub fn all_policies(&self) -> Vec<PolicyEntry> {
        self.policy_snapshot().all_entries()
    }

    /// Best entry of the bucket consulted by the last selection.
    pub fn current_policy(&self) -> Option<PolicyEntry> {
        let bucket = self.last_bucket.lock().clone()?;
        self.policy_snapshot()
            .best_for(&bucket, self.config.selector.min_samples)
            .cloned()
    }

    pub fn heatmap(&self) -> Vec<HeatmapCell> {
        self.policy_snapshot().heatmap()
    }

    pub fn get_stats(&self, range: TimeRange) -> MirrorStats {
        let rec = self.recorder.lock();
        MirrorStats::from_episodes(rec.log().iter(), range)
    }

    // ------------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------------

    /// Force an aggregation pass now. Privileged; authorization is the
    /// caller's job.
    pub fn trigger_replay(&self) -> ReplaySummary {
        self.run_pass("replay")
    }

    /// Run a pass if the schedule is due. Returns `None` when it was not.
    pub fn run_scheduled(&self) -> Option<ReplaySummary> {
        let now = self.clock.now_ms();
        if self.schedule.lock().poll(now) {
            Some(self.run_pass("scheduled"))
        } else {
            None
        }
    }

    fn run_pass(&self, reason: &str) -> ReplaySummary {
        let mut last_pass = self.pass_lock.lock();
        let now = self.clock.now_ms();

        let min_gap = self.config.aggregation.min_pass_interval_ms;
        if let Some(last) = *last_pass {
            if min_gap > 0 && dt_ms(now, last) < min_gap {
                log::debug!("mirror {} pass skipped: last pass {}ms ago", reason, dt_ms(now, last));
                return ReplaySummary {
                    skipped: true,
                    ..ReplaySummary::default()
                };
            }
        }

        // Episodes completing after this point belong to the next pass.
        let snapshot = {
            let mut rec = self.recorder.lock();
            let evicted = rec.log_mut().prune(now);
            if evicted > 0 {
                log::debug!("mirror log evicted {} expired episodes", evicted);
            }
            rec.log().snapshot()
        };
        *last_pass = Some(now);

        if snapshot.is_empty() {
            log::debug!("mirror {} pass: episode log empty, table unchanged", reason);
            return ReplaySummary::default();
        }

        let current = self.policy_snapshot();
        let (next, summary) = current.aggregate(&snapshot, now);
        if summary.episodes_folded > 0 {
            *self.table.write() = Arc::new(next);
        }
        log::info!(
            "mirror {} pass: {} episodes ({} new), {} buckets updated",
            reason,
            summary.episodes_processed,
            summary.episodes_folded,
            summary.buckets_updated
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SelectorConfig;
    use crate::domain::Tone;
    use crate::selector::{FieldHeuristic, PolicySource};

    const T0: i64 = 1_704_119_400_000;

    fn mirror(clock: Arc<ManualClock>) -> MirrorLoop {
        let config = MirrorConfig {
            selector: SelectorConfig {
                epsilon: 0.0,
                min_samples: 1,
                seed: Some(11),
            },
            ..MirrorConfig::default()
        };
        MirrorLoop::with_clock(config, clock).unwrap()
    }

    fn field(ts_ms: i64, coherence: f64, entropy: f64) -> FieldState {
        FieldState::new([0.3, 0.7, 0.2], entropy, coherence, 45, ts_ms)
    }

    #[test]
    fn full_cycle_learns_and_exploits() {
        let clock = Arc::new(ManualClock::new(T0));
        let m = mirror(clock.clone());

        let pre = field(T0, 0.3, 0.6);
        let first = m.select_action(&pre, &FieldHeuristic);
        assert_eq!(first.source, PolicySource::Fallback);

        let id = m
            .begin_episode(pre, Action::new(Tone::Warm, 0.5))
            .unwrap()
            .unwrap();
        clock.advance(1_500);
        let out = m
            .complete_episode(id, field(T0 + 1_500, 0.5, 0.4))
            .unwrap();
        assert!(out.is_recorded());

        let summary = m.trigger_replay();
        assert_eq!(summary.episodes_processed, 1);
        assert_eq!(summary.buckets_updated, 1);

        let next = m.select_action(&field(T0 + 2_000, 0.5, 0.4), &FieldHeuristic);
        assert_eq!(next.source, PolicySource::Mirror);
        assert_eq!(next.action.tone, Tone::Warm);
        assert_eq!(m.current_policy().unwrap().tone, Tone::Warm);
    }

    #[test]
    fn replay_on_empty_log_is_noop() {
        let clock = Arc::new(ManualClock::new(T0));
        let m = mirror(clock);
        assert_eq!(m.trigger_replay(), ReplaySummary::default());
        assert!(m.policy_snapshot().is_empty());
    }

    #[test]
    fn stale_completion_leaves_everything_untouched() {
        let clock = Arc::new(ManualClock::new(T0));
        let m = mirror(clock.clone());
        let id = m
            .begin_episode(field(T0, 0.3, 0.6), Action::new(Tone::Cool, 0.9))
            .unwrap()
            .unwrap();
        clock.advance(5_001);
        let out = m.complete_episode(id, field(T0 + 5_001, 0.9, 0.1)).unwrap();
        assert!(matches!(out, CompletionOutcome::Stale { .. }));
        assert_eq!(m.episode_count(), 0);
        m.trigger_replay();
        assert!(m.policy_snapshot().is_empty());
    }

    #[test]
    fn min_pass_interval_throttles_forced_replays() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut config = MirrorConfig::default();
        config.aggregation.min_pass_interval_ms = 10_000;
        let m = MirrorLoop::with_clock(config, clock.clone()).unwrap();

        assert!(!m.trigger_replay().skipped);
        assert!(m.trigger_replay().skipped);
        clock.advance(10_000);
        assert!(!m.trigger_replay().skipped);
    }

    #[test]
    fn scheduled_pass_runs_once_per_interval() {
        let clock = Arc::new(ManualClock::new(T0));
        let m = mirror(clock.clone());
        assert!(m.run_scheduled().is_none());
        clock.advance(59_999);
        assert!(m.run_scheduled().is_none());
        clock.advance(1);
        assert!(m.run_scheduled().is_some());
        assert!(m.run_scheduled().is_none());
    }
}
