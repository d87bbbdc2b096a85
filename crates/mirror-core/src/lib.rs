//! Mirror loop core: a contextual-bandit policy engine for field feedback.
//!
//! Field snapshots are bucketed by context, feedback actions are recorded as
//! pre/post episodes, rewards are aggregated into a policy table, and the
//! table drives ε-greedy action selection with a heuristic fallback.
//!
//! [`MirrorLoop`] is the service object; everything else is either plain data
//! or a collaborator trait it is wired to.

// Lints allowed crate-wide:
// - new_without_default: new() on collaborators reads better at call sites
// - manual_clamp: min/max chains kept where NaN handling differs from clamp
// - type_complexity: aggregation accumulators keyed by tuples
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_clamp)]
#![allow(clippy::type_complexity)]

pub mod bucket;
pub mod clock;
pub mod config;
pub mod cycle; // sample -> select -> emit -> record
pub mod domain;
pub mod engine;
pub mod field; // reference EMA field sampler
pub mod message; // client wire frames
pub mod policy_table;
pub mod recorder;
pub mod reward;
pub mod scheduler;
pub mod selector;
pub mod stats;

#[cfg(test)]
pub mod tests_config;
#[cfg(test)]
pub mod tests_proptest;

// ============================================================================
// CURATED PUBLIC API EXPORTS
// ============================================================================

// Domain types
pub use domain::{
    dt_ms, Action, Episode, EpisodeId, FieldState, IntensityBin, MirrorError, PolicyEntry,
    PolicyKey, Tone,
};

// Bucketing
pub use bucket::{bucket_for, bucket_key, Axis, BucketKey, LoadBin, BUCKET_SPACE};

// Configuration
pub use config::{
    AggregationConfig, ConfigError, MirrorConfig, RecorderConfig, RewardConfig, SelectorConfig,
};

// Time
pub use clock::{Clock, ManualClock, SystemClock};

// Learning pipeline
pub use policy_table::{HeatmapCell, PolicyTable, ReplaySummary};
pub use recorder::{CompletionOutcome, EpisodeLog, EpisodeRecorder, LogSnapshot};
pub use reward::compute_reward;
pub use selector::{
    Decision, FallbackPolicy, FieldHeuristic, Participation, PolicySelector, PolicySource,
};
pub use stats::{MirrorStats, TimeRange};

// Service object and background learner
pub use engine::MirrorLoop;
pub use scheduler::{AggregationSchedule, LearnerWorker};

// Orchestration and boundary
pub use cycle::{
    CycleReport, FeedbackCycle, FeedbackEmitter, FieldSampler, NoOptOut, OptOutRegistry,
    OptOutSet,
};
pub use field::AstroField;
pub use message::{FeedbackAck, FeedbackFrame, InboundFrame, OutboundFrame, Reflection};
