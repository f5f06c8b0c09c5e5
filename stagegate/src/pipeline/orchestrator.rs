//! Pipeline orchestrator.
//!
//! Runs stages strictly in order, consults the gating rule before each one,
//! and finishes with exactly one lifecycle category plus `always`. The
//! whole sequence can be retried and bounded as a unit.

use super::{Deadline, GateDecision, GatingRule, HookContext, LifecycleHooks, RetryPolicy, TimeoutSpec};
use crate::cancellation::CancellationToken;
use crate::core::{LifecycleCategory, PipelineAttempt, PipelineEvent, StageOutcome, StageRecord};
use crate::errors::{ErrorSummary, PipelineError};
use crate::events::EventSink;
use crate::stages::{Stage, StageContext};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Whole-run settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineSettings {
    /// Bound on the entire run, including whole-pipeline retries.
    pub overall_timeout: Option<TimeoutSpec>,
    /// Additional passes over the stage sequence after a failed one.
    pub pipeline_retries: u32,
    /// Delay between passes.
    pub retry_delay: Duration,
}

/// What happened during one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Pipeline name.
    pub pipeline: String,
    /// Unique run identifier.
    pub run_id: String,
    /// Final result; `None` if no stage reached a terminal state.
    pub result: Option<StageOutcome>,
    /// The lifecycle category that was dispatched.
    pub category: LifecycleCategory,
    /// Every pass over the stage sequence, in order.
    pub attempts: Vec<PipelineAttempt>,
    /// The failure that decided the result, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    /// Pipeline-level hook failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_errors: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub ended_at: DateTime<Utc>,
}

impl PipelineReport {
    /// Returns the final pass.
    #[must_use]
    pub fn final_attempt(&self) -> Option<&PipelineAttempt> {
        self.attempts.last()
    }

    /// Returns the stages entered in the final pass.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.final_attempt().map(PipelineAttempt::executed).unwrap_or_default()
    }

    /// Returns the outcomes of the stages that ran in the final pass.
    #[must_use]
    pub fn outcomes(&self) -> Vec<StageOutcome> {
        self.final_attempt().map(PipelineAttempt::outcomes).unwrap_or_default()
    }

    /// Returns a stage record from the final pass.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.final_attempt().and_then(|a| a.stage(name))
    }

    /// Returns true if the run succeeded outright.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.category == LifecycleCategory::Success
    }

    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64
    }
}

/// An ordered, validated sequence of stages with its gating rule and hooks.
///
/// Built with [`PipelineBuilder`](super::PipelineBuilder).
pub struct Pipeline {
    pub(super) name: String,
    pub(super) stages: Vec<Stage>,
    pub(super) gating: GatingRule,
    pub(super) hooks: LifecycleHooks,
    pub(super) settings: PipelineSettings,
    pub(super) events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("gating", &self.gating)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Returns the run settings.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Executes the pipeline once.
    ///
    /// Never fails: every outcome, including aborts and timeouts, is
    /// reported in the returned [`PipelineReport`].
    pub async fn run(&self, token: Arc<CancellationToken>) -> PipelineReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let ledger: Mutex<Vec<PipelineAttempt>> = Mutex::new(Vec::new());

        info!(pipeline = %self.name, run_id = %run_id, stages = self.stages.len(), "Pipeline started");
        self.events
            .emit(&PipelineEvent::pipeline_started(&self.name, &run_id, self.stages.len()))
            .await;

        // The stop can arrive from any thread, so the event goes out without awaiting.
        let (sink, name) = (Arc::clone(&self.events), self.name.clone());
        token.on_cancel(move |reason| {
            sink.try_emit(&PipelineEvent::pipeline_cancelled(&name, reason));
        });

        let deadline = self
            .settings
            .overall_timeout
            .map(|limit| Deadline::after(limit.as_duration()));
        let mut policy = RetryPolicy::new(self.settings.pipeline_retries.saturating_add(1))
            .with_delay(self.settings.retry_delay);
        if let Some(deadline) = deadline {
            policy = policy.with_deadline(deadline);
        }
        let (run_id_ref, token_ref, ledger_ref) = (&run_id, &token, &ledger);
        let outcome = policy
            .execute("pipeline", &token, move |attempt| {
                self.run_sequence(attempt, run_id_ref, token_ref, ledger_ref, deadline)
            })
            .await;

        let stopped = matches!(&outcome, Err(err) if err.is_aborted());
        let error = match outcome {
            Ok(_) => None,
            Err(PipelineError::RetryExhausted { source, .. }) => Some(*source),
            Err(err) => Some(err),
        };
        if deadline.is_some_and(|d| d.has_passed()) {
            if let Some(err @ PipelineError::Timeout { .. }) = &error {
                error!(pipeline = %self.name, error = %err, "Pipeline exceeded its overall timeout");
            }
        }

        let mut attempts = ledger.into_inner();
        let mut result = attempts.last().and_then(|a| a.current_result);
        if stopped && result != Some(StageOutcome::Aborted) {
            warn!(pipeline = %self.name, reason = ?token.reason(), "Stop requested before the run concluded");
            result = Some(StageOutcome::Aborted);
            if let Some(last) = attempts.last_mut() {
                last.current_result = result;
            }
        }
        let category = result.map_or(LifecycleCategory::Success, |r| r.category());

        let hook_errors = self.dispatch_final_hooks(&run_id, category, result).await;

        let ended_at = Utc::now();
        let report = PipelineReport {
            pipeline: self.name.clone(),
            run_id,
            result,
            category,
            attempts,
            error: error.as_ref().map(ErrorSummary::from),
            hook_errors,
            started_at,
            ended_at,
        };

        info!(
            pipeline = %self.name,
            run_id = %report.run_id,
            category = %category,
            passes = report.attempts.len(),
            duration_ms = report.duration_ms(),
            "Pipeline finished"
        );
        self.events
            .emit(&PipelineEvent::pipeline_completed(
                &self.name,
                result.unwrap_or(StageOutcome::Success),
                report.duration_ms(),
            ))
            .await;
        report
    }

    /// One pass over the stages.
    ///
    /// Returns an error when the pass ends in `Failure` or `Aborted`, which
    /// is what the whole-pipeline retry reacts to.
    async fn run_sequence(
        &self,
        number: u32,
        run_id: &str,
        token: &Arc<CancellationToken>,
        ledger: &Mutex<Vec<PipelineAttempt>>,
        deadline: Option<Deadline>,
    ) -> Result<(), PipelineError> {
        ledger.lock().push(PipelineAttempt::new(number));
        if number > 1 {
            info!(pipeline = %self.name, attempt = number, "Retrying pipeline");
        }
        self.events
            .emit(&PipelineEvent::pipeline_attempt(&self.name, number))
            .await;

        let mut current: Option<StageOutcome> = None;
        let mut decisive: Option<PipelineError> = None;

        for stage in &self.stages {
            if let Some(expired) = deadline.filter(Deadline::has_passed) {
                if current.map_or(true, |c| c.allows_continuation()) {
                    error!(pipeline = %self.name, stage = %stage.name(), "Overall timeout reached between stages");
                    let next = current.map_or(StageOutcome::Failure, |c| c.worst(StageOutcome::Failure));
                    with_attempt(ledger, |a| a.current_result = Some(next));
                    current = Some(next);
                    decisive = Some(expired.to_error());
                }
            }

            if self.gating.decide(current) == GateDecision::Skip {
                let reason = format!("current result is {}", current.map_or_else(|| "undetermined".to_string(), |c| c.to_string()));
                info!(stage = %stage.name(), reason = %reason, "Skipping stage");
                with_attempt(ledger, |a| a.stages.push(StageRecord::skipped(stage.name())));
                self.events
                    .emit(&PipelineEvent::stage_skipped(stage.name(), &reason))
                    .await;
                continue;
            }

            with_attempt(ledger, |a| a.stages.push(StageRecord::running(stage.name())));
            self.events.emit(&PipelineEvent::stage_started(stage.name())).await;

            let ctx = StageContext::new(&self.name, run_id, stage.name(), Arc::clone(token))
                .with_deadline(deadline);
            let execution = stage.execute(&ctx).await;

            let next = current.map_or(execution.outcome, |c| c.worst(execution.outcome));
            with_attempt(ledger, |a| {
                if let Some(record) = a.stages.last_mut() {
                    record.finish(execution.outcome, execution.attempts, execution.error.as_ref());
                    record.hook_errors.clone_from(&execution.hook_errors);
                }
                a.current_result = Some(next);
            });
            self.events
                .emit(&PipelineEvent::stage_completed(
                    stage.name(),
                    execution.outcome,
                    execution.attempts,
                ))
                .await;

            if !execution.outcome.allows_continuation() {
                decisive = execution.error;
            }
            current = Some(next);
        }

        match current {
            Some(StageOutcome::Aborted) => Err(decisive.unwrap_or_else(|| token.to_error())),
            Some(StageOutcome::Failure) => Err(decisive.unwrap_or_else(|| {
                PipelineError::Config("stage failed without an error".to_string())
            })),
            _ => Ok(()),
        }
    }

    async fn dispatch_final_hooks(
        &self,
        run_id: &str,
        category: LifecycleCategory,
        result: Option<StageOutcome>,
    ) -> Vec<String> {
        let mut ctx = HookContext {
            pipeline: self.name.clone(),
            run_id: run_id.to_string(),
            category,
            result,
            stage: None,
        };

        let mut errors = self.hooks.dispatch(&ctx).await;
        ctx.category = LifecycleCategory::Always;
        let always_errors = self.hooks.dispatch(&ctx).await;

        for err in &errors {
            self.events.emit(&PipelineEvent::hook_failed(category, err)).await;
        }
        for err in &always_errors {
            self.events
                .emit(&PipelineEvent::hook_failed(LifecycleCategory::Always, err))
                .await;
        }
        errors.extend(always_errors);
        errors
    }
}

fn with_attempt(ledger: &Mutex<Vec<PipelineAttempt>>, f: impl FnOnce(&mut PipelineAttempt)) {
    if let Some(attempt) = ledger.lock().last_mut() {
        f(attempt);
    }
}
