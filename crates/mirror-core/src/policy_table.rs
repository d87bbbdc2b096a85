//! Policy table: (bucket, tone, intensity bin) -> mean reward estimate.
//!
//! The table is updated in batch from a snapshot of the episode log rather
//! than per episode. Each entry keeps a running reward sum and count, and the
//! table remembers the sequence number of the next episode it has not yet
//! folded in. Re-running aggregation over the same log therefore changes
//! nothing, timestamps included, and eviction from the log never lowers `n`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::bucket::BucketKey;
use crate::domain::{Episode, IntensityBin, PolicyEntry, PolicyKey, Tone};
use crate::recorder::LogSnapshot;

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    /// Buckets with at least one new or changed entry.
    pub buckets_updated: usize,
    /// Episodes in the snapshot the pass consumed.
    pub episodes_processed: usize,
    /// Of those, episodes folded in for the first time.
    #[serde(default)]
    pub episodes_folded: usize,
    /// The pass was throttled and did not run.
    #[serde(default)]
    pub skipped: bool,
}

/// Average reward per tone and intensity bin across all buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub tone: Tone,
    pub intensity_bin: IntensityBin,
    pub reward_avg: f64,
    pub n: u64,
}

/// Best-first ordering: higher mean, then more samples, then tone priority,
/// then lower intensity bin.
pub fn rank(a: &PolicyEntry, b: &PolicyEntry) -> Ordering {
    b.reward_avg
        .partial_cmp(&a.reward_avg)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.n.cmp(&a.n))
        .then_with(|| a.tone.cmp(&b.tone))
        .then_with(|| a.intensity_bin.cmp(&b.intensity_bin))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyTable {
    entries: BTreeMap<PolicyKey, PolicyEntry>,
    sums: BTreeMap<PolicyKey, f64>,
    /// Sequence number of the first episode not yet folded in.
    folded_through: u64,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &PolicyKey) -> Option<&PolicyEntry> {
        self.entries.get(key)
    }

    pub fn folded_through(&self) -> u64 {
        self.folded_through
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyEntry> {
        self.entries.values()
    }

    /// Entries of one bucket, best first.
    pub fn entries_for(&self, bucket: &BucketKey) -> Vec<PolicyEntry> {
        let mut out: Vec<PolicyEntry> = self
            .entries
            .values()
            .filter(|e| &e.bucket_key == bucket)
            .cloned()
            .collect();
        out.sort_by(rank);
        out
    }

    /// All entries ordered by bucket, best first within each bucket.
    pub fn all_entries(&self) -> Vec<PolicyEntry> {
        let mut out: Vec<PolicyEntry> = self.entries.values().cloned().collect();
        out.sort_by(|a, b| a.bucket_key.cmp(&b.bucket_key).then_with(|| rank(a, b)));
        out
    }

    /// Best entry with at least `min_samples` observations.
    pub fn best_for(&self, bucket: &BucketKey, min_samples: u64) -> Option<&PolicyEntry> {
        self.entries
            .values()
            .filter(|e| &e.bucket_key == bucket && e.n >= min_samples.max(1))
            .min_by(|a, b| rank(a, b))
    }

    pub fn bucket_count(&self) -> usize {
        self.entries
            .keys()
            .map(|k| &k.bucket_key)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Sample-weighted reward per (tone, bin) over every bucket.
    pub fn heatmap(&self) -> Vec<HeatmapCell> {
        let mut acc: BTreeMap<(Tone, IntensityBin), (f64, u64)> = BTreeMap::new();
        for e in self.entries.values() {
            let slot = acc.entry((e.tone, e.intensity_bin)).or_insert((0.0, 0));
            slot.0 += e.reward_avg * e.n as f64;
            slot.1 += e.n;
        }
        acc.into_iter()
            .filter(|(_, (_, n))| *n > 0)
            .map(|((tone, intensity_bin), (sum, n))| HeatmapCell {
                tone,
                intensity_bin,
                reward_avg: sum / n as f64,
                n,
            })
            .collect()
    }

    /// Fold an episode snapshot into a new table.
    ///
    /// Only episodes at or past the high-water mark are added to their
    /// entry's running sum and count; everything older was folded by an
    /// earlier pass. Entries without new episodes are carried over as-is, so
    /// `n` never decreases. An empty snapshot returns an unchanged copy.
    pub fn aggregate(&self, snapshot: &LogSnapshot, now_ms: i64) -> (PolicyTable, ReplaySummary) {
        let mut next = self.clone();
        if snapshot.is_empty() {
            return (next, ReplaySummary::default());
        }

        let skip = self.folded_through.saturating_sub(snapshot.first_seq) as usize;
        let fresh: &[Episode] = snapshot.episodes.get(skip..).unwrap_or(&[]);

        let mut groups: BTreeMap<PolicyKey, (f64, u64)> = BTreeMap::new();
        for ep in fresh {
            let slot = groups.entry(ep.policy_key()).or_insert((0.0, 0));
            slot.0 += ep.reward;
            slot.1 += 1;
        }

        let mut touched: BTreeSet<BucketKey> = BTreeSet::new();
        for (key, (sum, n)) in groups {
            touched.insert(key.bucket_key.clone());
            let total = next.sums.entry(key.clone()).or_insert(0.0);
            *total += sum;
            let total = *total;
            let entry = next.entries.entry(key.clone()).or_insert_with(|| PolicyEntry {
                bucket_key: key.bucket_key.clone(),
                tone: key.tone,
                intensity_bin: key.intensity_bin,
                reward_avg: 0.0,
                n: 0,
                updated_at_ms: now_ms,
            });
            entry.n += n;
            entry.reward_avg = total / entry.n as f64;
            entry.updated_at_ms = now_ms;
        }
        next.folded_through = next
            .folded_through
            .max(snapshot.first_seq + snapshot.len() as u64);

        let summary = ReplaySummary {
            buckets_updated: touched.len(),
            episodes_processed: snapshot.len(),
            episodes_folded: fresh.len(),
            skipped: false,
        };
        (next, summary)
    }

    /// Drop entries not refreshed since `cutoff_ms`. Returns how many went.
    pub fn prune_older_than(&mut self, cutoff_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.updated_at_ms >= cutoff_ms);
        let entries = &self.entries;
        self.sums.retain(|k, _| entries.contains_key(k));
        before - self.entries.len()
    }
}
