//! Domain types shared by every stage of the mirror loop.
//!
//! Everything here is plain data passed by value across the engine boundary:
//! field snapshots come in from the sampler, actions go out to the emitter,
//! episodes and policy entries are what the engine learns from and exposes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::bucket::BucketKey;

/// Compute elapsed milliseconds between two timestamps.
/// Returns 0 when the clock went backwards instead of wrapping.
#[inline]
pub fn dt_ms(now_ms: i64, last_ms: i64) -> u64 {
    if now_ms >= last_ms {
        now_ms.abs_diff(last_ms)
    } else {
        0
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MirrorError {
    #[error("invalid field state: {field} = {value}")]
    InvalidState { field: &'static str, value: f64 },
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("post-state timestamp {post_ms} does not follow pre-state timestamp {pre_ms}")]
    TimestampRegression { pre_ms: i64, post_ms: i64 },
    #[error("malformed message: {0}")]
    Message(String),
}

// ============================================================================
// Field state
// ============================================================================

/// Snapshot of the aggregate emotional field.
///
/// `entropy` and `coherence` are computed by the sampler and treated as opaque
/// here; the engine never derives them from `pad`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    /// Pleasure, arousal, dominance; each in [0, 1].
    pub pad: [f64; 3],
    pub entropy: f64,
    pub coherence: f64,
    /// Connected users when the snapshot was taken.
    #[serde(default)]
    pub connected: u32,
    /// Wall-clock milliseconds since the Unix epoch.
    pub ts_ms: i64,
}

impl FieldState {
    pub fn new(pad: [f64; 3], entropy: f64, coherence: f64, connected: u32, ts_ms: i64) -> Self {
        Self {
            pad,
            entropy,
            coherence,
            connected,
            ts_ms,
        }
    }

    /// Reject snapshots that would poison the policy table.
    pub fn validate(&self) -> Result<(), MirrorError> {
        const PAD_FIELDS: [&str; 3] = ["pad.pleasure", "pad.arousal", "pad.dominance"];
        for (name, &v) in PAD_FIELDS.iter().zip(self.pad.iter()) {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(MirrorError::InvalidState {
                    field: name,
                    value: v,
                });
            }
        }
        if !self.entropy.is_finite() || self.entropy < 0.0 {
            return Err(MirrorError::InvalidState {
                field: "entropy",
                value: self.entropy,
            });
        }
        if !self.coherence.is_finite() || !(0.0..=1.0).contains(&self.coherence) {
            return Err(MirrorError::InvalidState {
                field: "coherence",
                value: self.coherence,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Feedback tone. Declaration order is the tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Warm,
    Cool,
    Neutral,
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Warm, Tone::Cool, Tone::Neutral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Warm => "warm",
            Tone::Cool => "cool",
            Tone::Neutral => "neutral",
        }
    }

    /// Default message shown alongside the tone.
    pub fn message(&self) -> &'static str {
        match self {
            Tone::Warm => "The field is trembling. Invite a breath.",
            Tone::Cool => "The field is in harmony. A good moment to share.",
            Tone::Neutral => "Listening to the field.",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warm" => Ok(Tone::Warm),
            "cool" => Ok(Tone::Cool),
            "neutral" => Ok(Tone::Neutral),
            other => Err(MirrorError::InvalidAction(format!("unknown tone '{}'", other))),
        }
    }
}

/// Three equal-width intensity bins over [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityBin {
    Low,
    Medium,
    High,
}

impl IntensityBin {
    pub const ALL: [IntensityBin; 3] = [IntensityBin::Low, IntensityBin::Medium, IntensityBin::High];
    const WIDTH: f64 = 1.0 / 3.0;

    pub fn from_intensity(intensity: f64) -> Self {
        let x = intensity.clamp(0.0, 1.0);
        if x < Self::WIDTH {
            IntensityBin::Low
        } else if x < 2.0 * Self::WIDTH {
            IntensityBin::Medium
        } else {
            IntensityBin::High
        }
    }

    pub fn index(&self) -> usize {
        match self {
            IntensityBin::Low => 0,
            IntensityBin::Medium => 1,
            IntensityBin::High => 2,
        }
    }

    /// Intensity emitted for a learned action in this bin.
    pub fn midpoint(&self) -> f64 {
        (self.index() as f64 + 0.5) * Self::WIDTH
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntensityBin::Low => "low",
            IntensityBin::Medium => "medium",
            IntensityBin::High => "high",
        }
    }
}

impl fmt::Display for IntensityBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The feedback response delivered to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tone: Tone,
    /// Normalized to [0, 1].
    pub intensity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Action {
    pub fn new(tone: Tone, intensity: f64) -> Self {
        Self {
            tone,
            intensity,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn intensity_bin(&self) -> IntensityBin {
        IntensityBin::from_intensity(self.intensity)
    }

    pub fn validate(&self) -> Result<(), MirrorError> {
        if !self.intensity.is_finite() || !(0.0..=1.0).contains(&self.intensity) {
            return Err(MirrorError::InvalidAction(format!(
                "intensity {} outside [0, 1]",
                self.intensity
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Episodes and policy entries
// ============================================================================

/// Identifier of an episode in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeId(pub u64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// One observed (context, action, outcome) sample. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Engine clock time at which the episode completed.
    pub recorded_at_ms: i64,
    pub connected: u32,
    pub tone: Tone,
    pub intensity: f64,
    pub intensity_bin: IntensityBin,
    pub pre: FieldState,
    pub post: FieldState,
    pub elapsed_ms: u64,
    pub bucket_key: BucketKey,
    pub reward: f64,
}

impl Episode {
    pub fn delta_coherence(&self) -> f64 {
        self.post.coherence - self.pre.coherence
    }

    pub fn delta_entropy(&self) -> f64 {
        self.post.entropy - self.pre.entropy
    }

    pub fn policy_key(&self) -> PolicyKey {
        PolicyKey {
            bucket_key: self.bucket_key.clone(),
            tone: self.tone,
            intensity_bin: self.intensity_bin,
        }
    }
}

/// Composite identity of a policy entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyKey {
    pub bucket_key: BucketKey,
    pub tone: Tone,
    pub intensity_bin: IntensityBin,
}

/// Aggregated reward estimate for one (bucket, tone, intensity bin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub bucket_key: BucketKey,
    pub tone: Tone,
    pub intensity_bin: IntensityBin,
    pub reward_avg: f64,
    pub n: u64,
    pub updated_at_ms: i64,
}

impl PolicyEntry {
    pub fn key(&self) -> PolicyKey {
        PolicyKey {
            bucket_key: self.bucket_key.clone(),
            tone: self.tone,
            intensity_bin: self.intensity_bin,
        }
    }

    /// Action the selector emits when this entry wins.
    pub fn to_action(&self) -> Action {
        Action::new(self.tone, self.intensity_bin.midpoint())
    }
}
