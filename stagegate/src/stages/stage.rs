//! Stage definition and its execution state machine.

use super::{StageAction, StageContext};
use crate::config::StageOverride;
use crate::core::{LifecycleCategory, StageOutcome};
use crate::errors::PipelineError;
use crate::pipeline::{run_guarded, HookAction, HookContext, LifecycleHooks, RetryPolicy, TimeoutSpec};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A named unit of work with its recovery policies.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    action: Arc<dyn StageAction>,
    retry: Option<RetryPolicy>,
    timeout: Option<TimeoutSpec>,
    post_hooks: LifecycleHooks,
}

/// Result of executing a stage once.
#[derive(Debug)]
pub struct StageExecution {
    /// Terminal outcome.
    pub outcome: StageOutcome,
    /// Attempts the action made; 0 if cancelled before the first.
    pub attempts: u32,
    /// The failure behind a non-success outcome.
    pub error: Option<PipelineError>,
    /// Post-hook failures; these never change `outcome`.
    pub hook_errors: Vec<String>,
}

impl Stage {
    /// Creates a stage with no retry, no timeout and no post-hooks.
    pub fn new(name: impl Into<String>, action: Arc<dyn StageAction>) -> Self {
        Self {
            name: name.into(),
            action,
            retry: None,
            timeout: None,
            post_hooks: LifecycleHooks::new(),
        }
    }

    /// Wraps the action in a retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Bounds each attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: TimeoutSpec) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a post-hook.
    #[must_use]
    pub fn with_post_hook(mut self, category: LifecycleCategory, hook: Arc<dyn HookAction>) -> Self {
        self.post_hooks.register(category, hook);
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the retry policy, if any.
    #[must_use]
    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Returns the per-attempt timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<&TimeoutSpec> {
        self.timeout.as_ref()
    }

    /// Returns the post-hooks.
    #[must_use]
    pub fn post_hooks(&self) -> &LifecycleHooks {
        &self.post_hooks
    }

    /// Applies a configuration override.
    ///
    /// An override that sets retry fields on a stage without a policy gives
    /// it one.
    pub fn apply_override(&mut self, overrides: &StageOverride) {
        if let Some(timeout) = overrides.timeout {
            self.timeout = Some(timeout);
        }
        if overrides.max_attempts.is_none() && overrides.retry_delay_secs.is_none() {
            return;
        }
        let mut policy = self.retry.take().unwrap_or_default();
        if let Some(attempts) = overrides.max_attempts {
            policy.max_attempts = attempts;
        }
        if let Some(delay) = overrides.retry_delay_secs {
            policy.inter_attempt_delay = Duration::from_secs(delay);
        }
        self.retry = Some(policy);
    }

    /// Validates the stage definition.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("stage name must not be empty".to_string()));
        }
        let scoped = |e: PipelineError| PipelineError::Config(format!("stage '{}': {e}", self.name));
        if let Some(policy) = &self.retry {
            policy.validate().map_err(scoped)?;
        }
        if let Some(timeout) = &self.timeout {
            timeout.validate().map_err(scoped)?;
        }
        Ok(())
    }

    /// Runs the stage to a terminal outcome.
    ///
    /// Each attempt runs under the timeout guard; the retry policy wraps the
    /// guarded attempts, and the run's overall deadline bounds all of them.
    /// Unless the stage was aborted, its category post-hook and then its
    /// `always` post-hook run before this returns.
    pub async fn execute(&self, ctx: &StageContext) -> StageExecution {
        info!(stage = %self.name, "Stage started");

        let attempts = AtomicU32::new(0);
        let timeout = self.timeout;
        let attempt_once = |attempt: u32| {
            attempts.store(attempt, Ordering::SeqCst);
            let attempt_ctx = ctx.for_attempt(attempt);
            let action = Arc::clone(&self.action);
            async move {
                run_guarded(timeout.as_ref(), &attempt_ctx.token, action.run(&attempt_ctx)).await
            }
        };

        // Without a policy the single attempt's error is reported as-is.
        let attempted = async {
            match &self.retry {
                Some(policy) => policy
                    .execute(&self.name, &ctx.token, attempt_once)
                    .await
                    .map(|_| ()),
                None => match ctx.token.check() {
                    Ok(()) => attempt_once(1).await,
                    Err(err) => Err(err),
                },
            }
        };
        let result = match &ctx.deadline {
            Some(deadline) => deadline.race(attempted).await,
            None => attempted.await,
        };

        let attempts = attempts.load(Ordering::SeqCst);
        let (outcome, error) = match result {
            Ok(_) => (StageOutcome::Success, None),
            Err(err) if err.is_aborted() => (StageOutcome::Aborted, Some(err)),
            Err(err) if err.is_tolerable() => (StageOutcome::Unstable, Some(err)),
            Err(err) => (StageOutcome::Failure, Some(err)),
        };

        match (&outcome, &error) {
            (StageOutcome::Success, _) => info!(stage = %self.name, attempts, "Stage succeeded"),
            (StageOutcome::Unstable, Some(err)) => {
                warn!(stage = %self.name, attempts, error = %err, "Stage unstable");
            }
            (_, Some(err)) => error!(stage = %self.name, attempts, outcome = %outcome, error = %err, "Stage did not succeed"),
            (_, None) => {}
        }

        let hook_errors = if outcome == StageOutcome::Aborted {
            Vec::new()
        } else {
            self.run_post_hooks(ctx, outcome).await
        };

        StageExecution {
            outcome,
            attempts,
            error,
            hook_errors,
        }
    }

    async fn run_post_hooks(&self, ctx: &StageContext, outcome: StageOutcome) -> Vec<String> {
        if self.post_hooks.is_empty() {
            return Vec::new();
        }

        let mut hook_ctx = HookContext {
            pipeline: ctx.pipeline.clone(),
            run_id: ctx.run_id.clone(),
            category: outcome.category(),
            result: Some(outcome),
            stage: Some(self.name.clone()),
        };
        let mut errors = self.post_hooks.dispatch(&hook_ctx).await;

        hook_ctx.category = LifecycleCategory::Always;
        errors.extend(self.post_hooks.dispatch(&hook_ctx).await);
        errors
    }
}
