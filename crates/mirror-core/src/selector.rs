//! Action selection: ε-greedy over the policy table with a static fallback.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::bucket::{bucket_for, BucketKey};
use crate::config::SelectorConfig;
use crate::domain::{Action, FieldState, PolicyEntry, Tone};
use crate::policy_table::PolicyTable;

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    /// Best learned entry for the bucket.
    Mirror,
    /// Exploration draw; fallback action used.
    Explore,
    /// No usable data (or opted out); fallback action used.
    Fallback,
}

/// Whether the requesting context may be steered by learned data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Participation {
    #[default]
    Active,
    OptedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub bucket_key: BucketKey,
    pub source: PolicySource,
    /// The entry that produced a `Mirror` decision.
    pub entry: Option<PolicyEntry>,
}

/// Static heuristic used whenever learned data is unavailable.
pub trait FallbackPolicy: Send + Sync {
    fn fallback(&self, state: &FieldState) -> Action;
}

impl<F> FallbackPolicy for F
where
    F: Fn(&FieldState) -> Action + Send + Sync,
{
    fn fallback(&self, state: &FieldState) -> Action {
        self(state)
    }
}

/// Tone from field disorder/agreement, intensity from their balance.
///
/// entropy > 0.7 → warm, coherence > 0.8 → cool, otherwise neutral.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldHeuristic;

impl FallbackPolicy for FieldHeuristic {
    fn fallback(&self, state: &FieldState) -> Action {
        let tone = if state.entropy > 0.7 {
            Tone::Warm
        } else if state.coherence > 0.8 {
            Tone::Cool
        } else {
            Tone::Neutral
        };
        let intensity = ((state.coherence + (1.0 - state.entropy)) / 2.0).clamp(0.0, 1.0);
        Action::new(tone, intensity).with_message(tone.message())
    }
}

#[derive(Debug)]
pub struct PolicySelector {
    epsilon: f64,
    min_samples: u64,
    rng: StdRng,
}

impl PolicySelector {
    pub fn new(cfg: &SelectorConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            epsilon: cfg.epsilon,
            min_samples: cfg.min_samples,
            rng,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Choose an action for `state`.
    ///
    /// The exploration draw happens on every call so that the random stream
    /// does not depend on table contents.
    pub fn select(
        &mut self,
        table: &PolicyTable,
        state: &FieldState,
        fallback: &dyn FallbackPolicy,
        participation: Participation,
    ) -> Decision {
        let bucket_key = bucket_for(state);
        let draw: f64 = self.rng.gen();

        if participation == Participation::OptedOut {
            return Decision {
                action: fallback.fallback(state),
                bucket_key,
                source: PolicySource::Fallback,
                entry: None,
            };
        }

        if draw < self.epsilon {
            return Decision {
                action: fallback.fallback(state),
                bucket_key,
                source: PolicySource::Explore,
                entry: None,
            };
        }

        match table.best_for(&bucket_key, self.min_samples) {
            Some(best) => Decision {
                action: best.to_action().with_message(best.tone.message()),
                bucket_key,
                source: PolicySource::Mirror,
                entry: Some(best.clone()),
            },
            None => Decision {
                action: fallback.fallback(state),
                bucket_key,
                source: PolicySource::Fallback,
                entry: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketKey;
    use crate::domain::{Episode, IntensityBin};
    use crate::recorder::LogSnapshot;

    const T0: i64 = 1_704_119_400_000;

    fn state() -> FieldState {
        FieldState::new([0.3, 0.7, 0.2], 0.5, 0.6, 45, T0)
    }

    fn learned_table() -> PolicyTable {
        let s = state();
        let mk = |tone, intensity: f64, reward| Episode {
            recorded_at_ms: T0,
            connected: 45,
            tone,
            intensity,
            intensity_bin: IntensityBin::from_intensity(intensity),
            pre: s,
            post: FieldState { ts_ms: T0 + 1, ..s },
            elapsed_ms: 1,
            bucket_key: BucketKey::parse("14-M-A").unwrap(),
            reward,
        };
        let eps = vec![mk(Tone::Cool, 0.8, 0.42), mk(Tone::Warm, 0.2, 0.1)];
        let log = LogSnapshot {
            first_seq: 0,
            episodes: eps,
        };
        PolicyTable::new().aggregate(&log, T0).0
    }

    fn selector(epsilon: f64, seed: u64) -> PolicySelector {
        PolicySelector::new(&SelectorConfig {
            epsilon,
            min_samples: 1,
            seed: Some(seed),
        })
    }

    #[test]
    fn heuristic_matches_field_thresholds() {
        let h = FieldHeuristic;
        let hot = FieldState::new([0.5; 3], 0.8, 0.3, 1, 0);
        assert_eq!(h.fallback(&hot).tone, Tone::Warm);
        let calm = FieldState::new([0.5; 3], 0.1, 0.9, 1, 0);
        assert_eq!(h.fallback(&calm).tone, Tone::Cool);
        let mid = FieldState::new([0.5; 3], 0.5, 0.5, 1, 0);
        let a = h.fallback(&mid);
        assert_eq!(a.tone, Tone::Neutral);
        assert!((a.intensity - 0.5).abs() < 1e-12);
    }

    #[test]
    fn exploits_best_entry_when_epsilon_is_zero() {
        let mut sel = selector(0.0, 7);
        let d = sel.select(&learned_table(), &state(), &FieldHeuristic, Participation::Active);
        assert_eq!(d.source, PolicySource::Mirror);
        assert_eq!(d.bucket_key.as_str(), "14-M-A");
        assert_eq!(d.action.tone, Tone::Cool);
        assert!((d.action.intensity - IntensityBin::High.midpoint()).abs() < 1e-12);
    }

    #[test]
    fn empty_bucket_always_falls_back() {
        let mut sel = selector(0.0, 1);
        let table = PolicyTable::new();
        for _ in 0..1_000 {
            let d = sel.select(&table, &state(), &FieldHeuristic, Participation::Active);
            assert_eq!(d.action, FieldHeuristic.fallback(&state()));
            assert_ne!(d.source, PolicySource::Mirror);
        }
    }

    #[test]
    fn opted_out_never_consults_table() {
        let mut sel = selector(0.0, 3);
        let d = sel.select(&learned_table(), &state(), &FieldHeuristic, Participation::OptedOut);
        assert_eq!(d.source, PolicySource::Fallback);
        assert!(d.entry.is_none());
    }

    #[test]
    fn closure_fallback_is_accepted() {
        let mut sel = selector(1.0, 3);
        let fixed = |_: &FieldState| Action::new(Tone::Neutral, 0.05);
        let d = sel.select(&learned_table(), &state(), &fixed, Participation::Active);
        assert_eq!(d.source, PolicySource::Explore);
        assert_eq!(d.action, Action::new(Tone::Neutral, 0.05));
    }

    #[test]
    fn same_seed_same_decisions() {
        let table = learned_table();
        let mut a = selector(0.3, 99);
        let mut b = selector(0.3, 99);
        for _ in 0..200 {
            let da = a.select(&table, &state(), &FieldHeuristic, Participation::Active);
            let db = b.select(&table, &state(), &FieldHeuristic, Participation::Active);
            assert_eq!(da.source, db.source);
        }
    }
}
