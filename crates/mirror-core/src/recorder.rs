//! Episode recording: pre-state -> action -> post-state.
//!
//! An episode is opened with [`EpisodeRecorder::begin`] when a feedback action
//! is committed and closed with [`EpisodeRecorder::complete`] once the next
//! field snapshot arrives. Only completed, timely episodes reach the log.
//!
//! # Soft outcomes
//! Rate-limited begins, stale completions and unknown ids are ordinary
//! results, not errors. Only malformed snapshots are rejected.

use std::collections::{HashMap, VecDeque};

use crate::bucket::{bucket_for, BucketKey};
use crate::config::{RecorderConfig, RewardConfig};
use crate::domain::{dt_ms, Action, Episode, EpisodeId, FieldState, MirrorError};
use crate::reward::compute_reward;

/// Result of closing an episode.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Appended to the log.
    Recorded(Episode),
    /// Completed after the stale window; dropped.
    Stale { elapsed_ms: u64 },
    /// No such episode in progress (restart, duplicate completion, swept).
    Unknown,
}

impl CompletionOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, CompletionOutcome::Recorded(_))
    }
}

#[derive(Debug, Clone)]
struct PendingEpisode {
    pre: FieldState,
    action: Action,
    bucket_key: BucketKey,
    started_at_ms: i64,
}

// ============================================================================
// Episode log
// ============================================================================

/// Bounded episode log in completion order.
///
/// Bounded both by count and by age; eviction is strictly oldest-first.
#[derive(Debug, Clone)]
pub struct EpisodeLog {
    items: VecDeque<Episode>,
    capacity: usize,
    retention_ms: i64,
    appended: u64,
}

/// Owned copy of the log. Episode `i` carries sequence number
/// `first_seq + i`; sequence numbers count every append and never repeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    pub first_seq: u64,
    pub episodes: Vec<Episode>,
}

impl LogSnapshot {
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

impl EpisodeLog {
    pub fn new(capacity: usize, retention_secs: u64) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            retention_ms: (retention_secs as i64).saturating_mul(1_000),
            appended: 0,
        }
    }

    /// Append an episode, evicting from the front as needed.
    pub fn push(&mut self, episode: Episode) {
        self.prune(episode.recorded_at_ms);
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(episode);
        self.appended += 1;
    }

    /// Drop episodes that fell out of the retention horizon.
    /// Returns the number evicted.
    pub fn prune(&mut self, now_ms: i64) -> usize {
        let horizon = now_ms.saturating_sub(self.retention_ms);
        let mut evicted = 0;
        while let Some(front) = self.items.front() {
            if front.recorded_at_ms >= horizon {
                break;
            }
            self.items.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Episode> {
        self.items.iter()
    }

    /// Sequence number of the oldest retained episode.
    pub fn first_seq(&self) -> u64 {
        self.appended - self.items.len() as u64
    }

    /// Owned copy of the current log, oldest first.
    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            first_seq: self.first_seq(),
            episodes: self.items.iter().cloned().collect(),
        }
    }

    /// Most recent `limit` episodes, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Episode> {
        self.items.iter().rev().take(limit).cloned().collect()
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug)]
pub struct EpisodeRecorder {
    cfg: RecorderConfig,
    reward_cfg: RewardConfig,
    next_id: u64,
    pending: HashMap<EpisodeId, PendingEpisode>,
    last_begin: HashMap<BucketKey, i64>,
    log: EpisodeLog,
}

impl EpisodeRecorder {
    pub fn new(cfg: RecorderConfig, reward_cfg: RewardConfig) -> Self {
        let log = EpisodeLog::new(cfg.capacity, cfg.retention_secs);
        Self {
            cfg,
            reward_cfg,
            next_id: 1,
            pending: HashMap::new(),
            last_begin: HashMap::new(),
            log,
        }
    }

    /// Open an episode.
    ///
    /// Returns `Ok(None)` when the pre-state's bucket already started an
    /// episode within the cooldown window.
    pub fn begin(
        &mut self,
        pre: FieldState,
        action: Action,
        now_ms: i64,
    ) -> Result<Option<EpisodeId>, MirrorError> {
        pre.validate()?;
        action.validate()?;
        self.sweep(now_ms);

        let bucket_key = bucket_for(&pre);
        if let Some(&last) = self.last_begin.get(&bucket_key) {
            if dt_ms(now_ms, last) < self.cfg.cooldown_ms {
                log::debug!("mirror begin rate-limited for bucket {}", bucket_key);
                return Ok(None);
            }
        }

        let id = EpisodeId(self.next_id);
        self.next_id += 1;
        self.last_begin.insert(bucket_key.clone(), now_ms);
        self.pending.insert(
            id,
            PendingEpisode {
                pre,
                action,
                bucket_key,
                started_at_ms: now_ms,
            },
        );
        Ok(Some(id))
    }

    /// Close an episode with the observed post-state.
    pub fn complete(
        &mut self,
        id: EpisodeId,
        post: FieldState,
        now_ms: i64,
    ) -> Result<CompletionOutcome, MirrorError> {
        post.validate()?;

        let pre_ts = match self.pending.get(&id) {
            Some(p) => p.pre.ts_ms,
            None => {
                log::debug!("mirror completion for unknown episode {}", id);
                return Ok(CompletionOutcome::Unknown);
            }
        };
        if post.ts_ms <= pre_ts {
            return Err(MirrorError::TimestampRegression {
                pre_ms: pre_ts,
                post_ms: post.ts_ms,
            });
        }

        let pending = match self.pending.remove(&id) {
            Some(p) => p,
            None => return Ok(CompletionOutcome::Unknown),
        };

        let elapsed_ms = dt_ms(now_ms, pending.started_at_ms);
        if elapsed_ms > self.cfg.stale_after_ms {
            log::debug!(
                "mirror episode {} stale after {}ms in bucket {}",
                id,
                elapsed_ms,
                pending.bucket_key
            );
            return Ok(CompletionOutcome::Stale { elapsed_ms });
        }

        let reward = compute_reward(&pending.pre, &post, &self.reward_cfg);
        let episode = Episode {
            recorded_at_ms: now_ms,
            connected: pending.pre.connected,
            tone: pending.action.tone,
            intensity: pending.action.intensity,
            intensity_bin: pending.action.intensity_bin(),
            pre: pending.pre,
            post,
            elapsed_ms,
            bucket_key: pending.bucket_key,
            reward,
        };
        log::debug!(
            "mirror episode {} recorded for bucket {} (reward {:.4})",
            id,
            episode.bucket_key,
            reward
        );
        self.log.push(episode.clone());
        Ok(CompletionOutcome::Recorded(episode))
    }

    /// Forget pending episodes that can no longer complete in time and
    /// cooldown marks that have expired.
    pub fn sweep(&mut self, now_ms: i64) {
        let stale_after = self.cfg.stale_after_ms;
        self.pending
            .retain(|_, p| dt_ms(now_ms, p.started_at_ms) <= stale_after);
        let cooldown = self.cfg.cooldown_ms;
        self.last_begin
            .retain(|_, &mut last| dt_ms(now_ms, last) < cooldown);
    }

    pub fn log(&self) -> &EpisodeLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut EpisodeLog {
        &mut self.log
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
