//! Stage outcome, execution state and lifecycle category enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome of a stage, and the value gating decisions are made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutcome {
    /// The stage's action completed without failure.
    Success,
    /// The action failed in a way that does not block downstream stages.
    Unstable,
    /// The action failed.
    Failure,
    /// External cancellation interrupted the stage.
    Aborted,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Unstable => write!(f, "UNSTABLE"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl StageOutcome {
    /// Returns true if downstream stages may run after this outcome.
    #[must_use]
    pub fn allows_continuation(&self) -> bool {
        matches!(self, Self::Success | Self::Unstable)
    }

    /// Returns the lifecycle hook category dispatched for this result.
    #[must_use]
    pub fn category(&self) -> LifecycleCategory {
        match self {
            Self::Success => LifecycleCategory::Success,
            Self::Unstable => LifecycleCategory::Unstable,
            Self::Failure => LifecycleCategory::Failure,
            Self::Aborted => LifecycleCategory::Aborted,
        }
    }

    /// Combines two results, keeping the more severe one.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Unstable => 1,
            Self::Failure => 2,
            Self::Aborted => 3,
        }
    }
}

/// Execution state of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Not yet entered.
    #[default]
    Pending,
    /// Action in progress.
    Running,
    /// Terminal state reached.
    Finished(StageOutcome),
    /// Never entered because the gating rule skipped it.
    Skipped,
}

impl StageState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Skipped)
    }

    /// Returns the outcome, if the stage finished.
    #[must_use]
    pub fn outcome(&self) -> Option<StageOutcome> {
        match self {
            Self::Finished(outcome) => Some(*outcome),
            _ => None,
        }
    }
}

/// Lifecycle hook categories.
///
/// Exactly one of `Success`, `Unstable`, `Failure` or `Aborted` is dispatched
/// per pipeline execution; `Always` runs in addition, unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleCategory {
    /// Runs regardless of outcome.
    Always,
    /// Final result was success.
    Success,
    /// Final result was unstable.
    Unstable,
    /// Final result was failure.
    Failure,
    /// The run was aborted.
    Aborted,
}

impl fmt::Display for LifecycleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Success => write!(f, "success"),
            Self::Unstable => write!(f, "unstable"),
            Self::Failure => write!(f, "failure"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}
