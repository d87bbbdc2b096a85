//! One turn of the feedback loop against external collaborators.
//!
//! sample pre-state → select → emit → open episode → sample post-state →
//! close episode.
//!
//! The collaborators are traits so that transports (websocket hub, test
//! doubles, the CLI simulation) plug in without the core knowing about them.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::{Action, EpisodeId, FieldState, MirrorError};
use crate::engine::MirrorLoop;
use crate::recorder::CompletionOutcome;
use crate::selector::{Decision, FallbackPolicy, Participation};

// ============================================================================
// Collaborators
// ============================================================================

/// Source of aggregate field snapshots.
pub trait FieldSampler: Send + Sync {
    fn sample(&self) -> FieldState;
}

impl<F> FieldSampler for F
where
    F: Fn() -> FieldState + Send + Sync,
{
    fn sample(&self) -> FieldState {
        self()
    }
}

/// Delivers a chosen action to clients.
pub trait FeedbackEmitter: Send + Sync {
    fn emit(&self, action: &Action);
}

impl<F> FeedbackEmitter for F
where
    F: Fn(&Action) + Send + Sync,
{
    fn emit(&self, action: &Action) {
        self(action)
    }
}

/// Per-user mirror participation flag. Users are never stored by the core.
pub trait OptOutRegistry: Send + Sync {
    fn is_opted_out(&self, user_id: &str) -> bool;
}

/// Registry where nobody has opted out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOptOut;

impl OptOutRegistry for NoOptOut {
    fn is_opted_out(&self, _user_id: &str) -> bool {
        false
    }
}

/// In-memory opt-out set.
#[derive(Debug, Default)]
pub struct OptOutSet {
    users: RwLock<HashSet<String>>,
}

impl OptOutSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opt_out(&self, user_id: impl Into<String>) {
        self.users.write().insert(user_id.into());
    }

    pub fn opt_in(&self, user_id: &str) {
        self.users.write().remove(user_id);
    }
}

impl OptOutRegistry for OptOutSet {
    fn is_opted_out(&self, user_id: &str) -> bool {
        self.users.read().contains(user_id)
    }
}

// ============================================================================
// Cycle
// ============================================================================

/// What happened during one [`FeedbackCycle::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    #[serde(skip)]
    pub decision: Decision,
    pub opted_out: bool,
    /// `None` when the user opted out or the bucket was cooling down.
    pub episode_id: Option<EpisodeId>,
    /// Reward of the recorded episode, if one was recorded.
    pub reward: Option<f64>,
    #[serde(skip)]
    pub outcome: Option<CompletionOutcome>,
}

impl CycleReport {
    pub fn recorded(&self) -> bool {
        self.outcome.as_ref().map_or(false, |o| o.is_recorded())
    }
}

pub struct FeedbackCycle {
    mirror: Arc<MirrorLoop>,
    sampler: Arc<dyn FieldSampler>,
    fallback: Arc<dyn FallbackPolicy>,
    emitter: Arc<dyn FeedbackEmitter>,
    opt_out: Arc<dyn OptOutRegistry>,
}

impl FeedbackCycle {
    pub fn new(
        mirror: Arc<MirrorLoop>,
        sampler: Arc<dyn FieldSampler>,
        fallback: Arc<dyn FallbackPolicy>,
        emitter: Arc<dyn FeedbackEmitter>,
    ) -> Self {
        Self {
            mirror,
            sampler,
            fallback,
            emitter,
            opt_out: Arc::new(NoOptOut),
        }
    }

    pub fn with_opt_out(mut self, registry: Arc<dyn OptOutRegistry>) -> Self {
        self.opt_out = registry;
        self
    }

    pub fn mirror(&self) -> &Arc<MirrorLoop> {
        &self.mirror
    }

    /// Run one turn on behalf of `user_id` (anonymous when `None`).
    ///
    /// Opted-out users get the fallback action and produce no episode.
    pub fn run(&self, user_id: Option<&str>) -> Result<CycleReport, MirrorError> {
        let opted_out = user_id.map_or(false, |u| self.opt_out.is_opted_out(u));
        let participation = if opted_out {
            Participation::OptedOut
        } else {
            Participation::Active
        };

        let pre = self.sampler.sample();
        pre.validate()?;

        let decision = self
            .mirror
            .select_action_for(&pre, self.fallback.as_ref(), participation);
        decision.action.validate()?;
        self.emitter.emit(&decision.action);

        if opted_out {
            log::debug!("mirror cycle: opted-out user, episode not recorded");
            return Ok(CycleReport {
                decision,
                opted_out,
                episode_id: None,
                reward: None,
                outcome: None,
            });
        }

        let episode_id = self.mirror.begin_episode(pre, decision.action.clone())?;
        let Some(id) = episode_id else {
            return Ok(CycleReport {
                decision,
                opted_out,
                episode_id: None,
                reward: None,
                outcome: None,
            });
        };

        let post = self.sampler.sample();
        let outcome = self.mirror.complete_episode(id, post)?;
        let reward = match &outcome {
            CompletionOutcome::Recorded(ep) => Some(ep.reward),
            _ => None,
        };

        Ok(CycleReport {
            decision,
            opted_out,
            episode_id: Some(id),
            reward,
            outcome: Some(outcome),
        })
    }
}

impl std::fmt::Debug for FeedbackCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackCycle")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}
