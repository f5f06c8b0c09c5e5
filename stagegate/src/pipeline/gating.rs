//! Conditional gating between stages.

use crate::core::StageOutcome;
use std::sync::Arc;

/// Whether the next stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Enter the next stage.
    Continue,
    /// Skip the next stage (and, for the orchestrator, every stage after it).
    Skip,
}

type GateFn = dyn Fn(Option<StageOutcome>) -> GateDecision + Send + Sync;

/// Decides from the run's current result whether the next stage runs.
///
/// The current result is passed in explicitly; `None` means no stage has
/// reached a terminal state yet.
#[derive(Clone)]
pub struct GatingRule {
    name: &'static str,
    decide: Arc<GateFn>,
}

impl Default for GatingRule {
    /// Continues while the result is undetermined, `Success` or `Unstable`.
    fn default() -> Self {
        Self {
            name: "default",
            decide: Arc::new(|current| match current {
                None => GateDecision::Continue,
                Some(outcome) if outcome.allows_continuation() => GateDecision::Continue,
                Some(_) => GateDecision::Skip,
            }),
        }
    }
}

impl std::fmt::Debug for GatingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GatingRule").field(&self.name).finish()
    }
}

impl GatingRule {
    /// Continues only while every stage so far has succeeded.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            name: "strict",
            decide: Arc::new(|current| match current {
                None | Some(StageOutcome::Success) => GateDecision::Continue,
                Some(_) => GateDecision::Skip,
            }),
        }
    }

    /// A caller-supplied rule.
    ///
    /// `Failure` and `Aborted` always skip regardless of what `decide`
    /// returns, so a custom rule can only be stricter than the default.
    pub fn custom<F>(decide: F) -> Self
    where
        F: Fn(Option<StageOutcome>) -> GateDecision + Send + Sync + 'static,
    {
        Self {
            name: "custom",
            decide: Arc::new(move |current| match current {
                Some(StageOutcome::Failure | StageOutcome::Aborted) => GateDecision::Skip,
                other => decide(other),
            }),
        }
    }

    /// Returns the rule's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Evaluates the rule.
    #[must_use]
    pub fn decide(&self, current: Option<StageOutcome>) -> GateDecision {
        (self.decide)(current)
    }
}
