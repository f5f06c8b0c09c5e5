//! Run records collected while a pipeline executes.

use super::{StageOutcome, StageState};
use crate::errors::{ErrorSummary, PipelineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to one stage during one pipeline attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Final state of the stage.
    pub state: StageState,
    /// Number of attempts the stage's action made.
    pub attempts: u32,
    /// When the stage entered RUNNING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached its terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// The failure that determined the outcome, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    /// Post-hook failures, which never change the outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_errors: Vec<String>,
}

impl StageRecord {
    /// Creates a record for a stage that is about to run.
    #[must_use]
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Running,
            attempts: 0,
            started_at: Some(Utc::now()),
            ended_at: None,
            error: None,
            hook_errors: Vec::new(),
        }
    }

    /// Creates a record for a stage the gating rule skipped.
    #[must_use]
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Skipped,
            attempts: 0,
            started_at: None,
            ended_at: None,
            error: None,
            hook_errors: Vec::new(),
        }
    }

    /// Moves the record into its terminal state.
    pub fn finish(&mut self, outcome: StageOutcome, attempts: u32, error: Option<&PipelineError>) {
        self.state = StageState::Finished(outcome);
        self.attempts = attempts;
        self.ended_at = Some(Utc::now());
        self.error = error.map(ErrorSummary::from);
    }

    /// Returns the outcome, if the stage ran.
    #[must_use]
    pub fn outcome(&self) -> Option<StageOutcome> {
        self.state.outcome()
    }

    /// Returns true if the stage was entered.
    #[must_use]
    pub fn ran(&self) -> bool {
        self.started_at.is_some()
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64),
            _ => None,
        }
    }
}

/// One pass over the stage sequence.
///
/// A run has more than one attempt only when whole-pipeline retries are
/// configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Records in definition order, including skipped stages.
    pub stages: Vec<StageRecord>,
    /// `None` until the first stage reaches a terminal state.
    pub current_result: Option<StageOutcome>,
}

impl PipelineAttempt {
    /// Creates an empty attempt.
    #[must_use]
    pub fn new(number: u32) -> Self {
        Self {
            number,
            stages: Vec::new(),
            current_result: None,
        }
    }

    /// Returns the record for a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.name == name)
    }

    /// Returns the names of stages that were entered, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.ran())
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Returns the outcome sequence of the stages that ran.
    #[must_use]
    pub fn outcomes(&self) -> Vec<StageOutcome> {
        self.stages.iter().filter_map(StageRecord::outcome).collect()
    }
}
