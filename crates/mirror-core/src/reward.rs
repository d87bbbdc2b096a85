//! Reward signal: did the action make the field more coherent and less
//! disordered?
//!
//! `reward = Δcoherence − Δentropy`, with entropy brought onto the same [0, 1]
//! scale as coherence first (see [`RewardConfig::entropy_scale`]). The reward
//! is a pure function of the two snapshots; whether an episode is valid at all
//! is decided by the recorder.

use crate::config::RewardConfig;
use crate::domain::FieldState;

#[inline]
fn normalized_entropy(entropy: f64, scale: f64) -> f64 {
    (entropy / scale).clamp(0.0, 1.0)
}

/// Score the transition from `pre` to `post`.
pub fn compute_reward(pre: &FieldState, post: &FieldState, cfg: &RewardConfig) -> f64 {
    let delta_coherence = post.coherence - pre.coherence;
    let delta_entropy = normalized_entropy(post.entropy, cfg.entropy_scale)
        - normalized_entropy(pre.entropy, cfg.entropy_scale);
    let reward = delta_coherence - delta_entropy;
    match cfg.clip {
        Some(bound) => reward.clamp(-bound, bound),
        None => reward,
    }
}
