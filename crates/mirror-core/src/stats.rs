use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::bucket::BUCKET_SPACE;
use crate::domain::Episode;

/// Inclusive window over episode completion times. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start_ms: i64, end_ms: i64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
        }
    }

    pub fn since(start_ms: i64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: None,
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        self.start_ms.map_or(true, |s| ts_ms >= s) && self.end_ms.map_or(true, |e| ts_ms <= e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorStats {
    pub episode_count: usize,
    pub average_reward: f64,
    /// Distinct buckets observed over the size of the bucket space.
    pub bucket_coverage_ratio: f64,
    pub unique_buckets: usize,
    pub avg_delta_coherence: f64,
    pub avg_delta_entropy: f64,
}

impl MirrorStats {
    pub fn from_episodes<'a, I>(episodes: I, range: TimeRange) -> Self
    where
        I: IntoIterator<Item = &'a Episode>,
    {
        let mut count = 0usize;
        let mut reward = 0.0;
        let mut d_coh = 0.0;
        let mut d_ent = 0.0;
        let mut buckets = BTreeSet::new();

        for ep in episodes.into_iter().filter(|e| range.contains(e.recorded_at_ms)) {
            count += 1;
            reward += ep.reward;
            d_coh += ep.delta_coherence();
            d_ent += ep.delta_entropy();
            buckets.insert(ep.bucket_key.as_str());
        }

        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        Self {
            episode_count: count,
            average_reward: reward / n,
            bucket_coverage_ratio: buckets.len() as f64 / BUCKET_SPACE as f64,
            unique_buckets: buckets.len(),
            avg_delta_coherence: d_coh / n,
            avg_delta_entropy: d_ent / n,
        }
    }
}
