//! Health-check poller.
//!
//! Polls a readiness probe at a fixed interval until it reports ready or the
//! attempt budget runs out. Worst-case waiting is `(max_attempts - 1) *
//! interval`, which keeps the bound predictable.

use crate::cancellation::{sleep_or_abort, CancellationToken};
use crate::errors::PipelineError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A readiness check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true if the checked condition currently holds.
    async fn check(&self) -> bool;

    /// Human-readable description, used in logs.
    fn describe(&self) -> String {
        "probe".to_string()
    }
}

/// A probe backed by an async closure.
pub struct FnProbe {
    description: String,
    func: Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>,
}

impl FnProbe {
    /// Creates a new closure probe.
    pub fn new<F, Fut>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            description: description.into(),
            func: Box::new(move || -> BoxFuture<'static, bool> { Box::pin(func()) }),
        }
    }
}

impl std::fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProbe")
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl Probe for FnProbe {
    async fn check(&self) -> bool {
        (self.func)().await
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Conjunction of independent checks.
///
/// Ready only when every sub-check passes within the same attempt; results
/// are not carried over between attempts. All sub-checks are evaluated on
/// every attempt so the logs show each one that is still failing. An empty
/// compound probe is vacuously ready.
#[derive(Clone, Default)]
pub struct CompoundProbe {
    checks: Vec<Arc<dyn Probe>>,
}

impl CompoundProbe {
    /// Creates an empty compound probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sub-check.
    #[must_use]
    pub fn with(mut self, probe: Arc<dyn Probe>) -> Self {
        self.checks.push(probe);
        self
    }

    /// Returns the number of sub-checks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns true if there are no sub-checks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[async_trait]
impl Probe for CompoundProbe {
    async fn check(&self) -> bool {
        let mut ready = true;
        for probe in &self.checks {
            if !probe.check().await {
                debug!(check = %probe.describe(), "Readiness sub-check not satisfied");
                ready = false;
            }
        }
        ready
    }

    fn describe(&self) -> String {
        self.checks
            .iter()
            .map(|p| p.describe())
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// A readiness probe with its polling budget.
#[derive(Clone)]
pub struct HealthCheckSpec {
    /// The readiness predicate.
    pub probe: Arc<dyn Probe>,
    /// Maximum probe attempts. Must be >= 1.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub interval: Duration,
}

impl std::fmt::Debug for HealthCheckSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckSpec")
            .field("probe", &self.probe.describe())
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish()
    }
}

impl HealthCheckSpec {
    /// Creates a spec with a budget of 12 attempts, 10 seconds apart.
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            max_attempts: 12,
            interval: Duration::from_secs(10),
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the interval between attempts.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validates the budget.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts < 1 {
            return Err(PipelineError::Config(
                "health check max_attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The longest time the poller can spend waiting between attempts.
    #[must_use]
    pub fn worst_case_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }

    /// Polls until ready, returning the 1-based attempt that succeeded.
    ///
    /// Returns `HealthCheckExhausted` after `max_attempts` negative results,
    /// or `Aborted` if cancellation arrives during an interval.
    pub async fn poll(&self, token: &CancellationToken) -> Result<u32, PipelineError> {
        let max_attempts = self.max_attempts.max(1);
        let target = self.probe.describe();

        for attempt in 1..=max_attempts {
            token.check()?;

            if self.probe.check().await {
                info!(probe = %target, attempt, "Health check passed");
                return Ok(attempt);
            }

            debug!(probe = %target, attempt, max_attempts, "Health check not ready");
            if attempt < max_attempts {
                sleep_or_abort(token, self.interval).await?;
            }
        }

        warn!(probe = %target, attempts = max_attempts, "Health check budget exhausted");
        Err(PipelineError::HealthCheckExhausted {
            attempts: max_attempts,
        })
    }
}
