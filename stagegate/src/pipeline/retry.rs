//! Retry policy executor.
//!
//! Wraps a fallible operation with a bounded number of attempts and a fixed
//! delay between them. The same executor is used per stage and for the
//! whole-pipeline retry; only the `scope` label differs.

use super::timeout::{duration_ms, Deadline};
use crate::cancellation::{sleep_or_abort, CancellationToken};
use crate::errors::PipelineError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reset step run between attempts (e.g. tearing down half-started services).
pub type FallbackAction = Arc<dyn Fn() -> BoxFuture<'static, Result<(), PipelineError>> + Send + Sync>;

/// When the fallback action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTiming {
    /// Before every attempt after the first.
    #[default]
    EveryRetry,
    /// Only before the final attempt.
    FinalAttemptOnly,
}

/// A value produced by a retried operation, with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The operation's result.
    pub value: T,
    /// 1-based count of attempts made, including the successful one.
    pub attempts: u32,
}

/// Bounded re-attempt policy.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first. Always >= 1 once validated.
    pub max_attempts: u32,
    /// Fixed delay before each re-attempt.
    pub inter_attempt_delay: Duration,
    /// When the fallback action runs.
    pub fallback_timing: FallbackTiming,
    fallback: Option<FallbackAction>,
    deadline: Option<Deadline>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("inter_attempt_delay", &self.inter_attempt_delay)
            .field("fallback_timing", &self.fallback_timing)
            .field("has_fallback", &self.fallback.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and no delay.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            inter_attempt_delay: Duration::ZERO,
            fallback_timing: FallbackTiming::EveryRetry,
            fallback: None,
            deadline: None,
        }
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inter_attempt_delay = delay;
        self
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the fallback action run between attempts.
    #[must_use]
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(
            move || -> BoxFuture<'static, Result<(), PipelineError>> { Box::pin(fallback()) },
        ));
        self
    }

    /// Sets when the fallback action runs.
    #[must_use]
    pub fn with_fallback_timing(mut self, timing: FallbackTiming) -> Self {
        self.fallback_timing = timing;
        self
    }

    /// Stops retrying once the next attempt could not start before `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns true if a fallback action is configured.
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Validates the policy configuration.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts < 1 {
            return Err(PipelineError::Config("max_attempts must be >= 1".to_string()));
        }
        Ok(())
    }

    fn runs_fallback_before(&self, attempt: u32) -> bool {
        attempt > 1
            && match self.fallback_timing {
                FallbackTiming::EveryRetry => true,
                FallbackTiming::FinalAttemptOnly => attempt == self.max_attempts,
            }
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The operation receives the 1-based attempt number. Aborts are
    /// returned as-is and never retried. On exhaustion the last failure is
    /// wrapped in `RetryExhausted`; a tolerable last failure stays tolerable.
    pub async fn execute<T, F, Fut>(
        &self,
        scope: &str,
        token: &CancellationToken,
        mut operation: F,
    ) -> Result<Attempted<T>, PipelineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            token.check()?;

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(scope, attempt, "Succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_aborted() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    warn!(scope, attempts = attempt, error = %err, "Retry budget exhausted");
                    return Err(exhausted(attempt, err));
                }
                Err(err)
                    if self
                        .deadline
                        .is_some_and(|d| !d.leaves(self.inter_attempt_delay)) =>
                {
                    warn!(scope, attempts = attempt, error = %err, "No time left for another attempt");
                    return Err(exhausted(attempt, err));
                }
                Err(err) => {
                    warn!(
                        scope,
                        attempt,
                        max_attempts,
                        delay_ms = duration_ms(self.inter_attempt_delay),
                        error = %err,
                        "Attempt failed, retrying"
                    );

                    if self.runs_fallback_before(attempt + 1) {
                        self.run_fallback(scope).await?;
                    }
                    sleep_or_abort(token, self.inter_attempt_delay).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_fallback(&self, scope: &str) -> Result<(), PipelineError> {
        let Some(fallback) = &self.fallback else {
            return Ok(());
        };

        debug!(scope, "Running fallback action");
        match fallback().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_aborted() => Err(err),
            Err(err) => {
                warn!(scope, error = %err, "Fallback action failed, continuing with next attempt");
                Ok(())
            }
        }
    }
}

fn exhausted(attempts: u32, last: PipelineError) -> PipelineError {
    match last {
        PipelineError::Tolerable(inner) => PipelineError::RetryExhausted {
            attempts,
            source: inner,
        }
        .tolerable(),
        other => PipelineError::RetryExhausted {
            attempts,
            source: Box::new(other),
        },
    }
}
