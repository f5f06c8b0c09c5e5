//! Timeout guard.

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Unit of a [`TimeoutSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Milliseconds => write!(f, "ms"),
            Self::Seconds => write!(f, "s"),
            Self::Minutes => write!(f, "min"),
            Self::Hours => write!(f, "h"),
        }
    }
}

/// A positive wall-clock bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutSpec {
    /// Quantity of `unit`.
    pub duration: u64,
    /// Unit of `duration`.
    pub unit: TimeUnit,
}

impl fmt::Display for TimeoutSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.duration, self.unit)
    }
}

impl TimeoutSpec {
    /// Creates a new timeout.
    #[must_use]
    pub fn new(duration: u64, unit: TimeUnit) -> Self {
        Self { duration, unit }
    }

    /// A bound in milliseconds.
    #[must_use]
    pub fn millis(duration: u64) -> Self {
        Self::new(duration, TimeUnit::Milliseconds)
    }

    /// A bound in seconds.
    #[must_use]
    pub fn seconds(duration: u64) -> Self {
        Self::new(duration, TimeUnit::Seconds)
    }

    /// A bound in minutes.
    #[must_use]
    pub fn minutes(duration: u64) -> Self {
        Self::new(duration, TimeUnit::Minutes)
    }

    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        match self.unit {
            TimeUnit::Milliseconds => Duration::from_millis(self.duration),
            TimeUnit::Seconds => Duration::from_secs(self.duration),
            TimeUnit::Minutes => Duration::from_secs(self.duration.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(self.duration.saturating_mul(3600)),
        }
    }

    /// Validates that the bound is positive.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.duration == 0 {
            return Err(PipelineError::Config("timeout duration must be positive".to_string()));
        }
        Ok(())
    }

    /// Runs `operation` under this bound only.
    ///
    /// If the bound elapses first the operation future is dropped and a
    /// `Timeout` error is returned; its result is never observed.
    pub async fn bound<T, Fut>(&self, operation: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let limit = self.as_duration();
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = %self, "Operation exceeded its time bound");
                Err(PipelineError::Timeout { duration: limit })
            }
        }
    }

    /// Runs `operation` under this bound, also giving up on cancellation.
    pub async fn guard<T, Fut>(
        &self,
        token: &CancellationToken,
        operation: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        token.check()?;
        tokio::select! {
            biased;
            () = token.cancelled() => Err(token.to_error()),
            result = self.bound(operation) => result,
        }
    }
}

// Stand-in for an unbounded deadline; roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A fixed end point shared by everything in one run.
///
/// Unlike [`TimeoutSpec`], which gives every attempt a fresh budget, a
/// deadline is set once and only gets closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    /// Starts a deadline `limit` from now.
    #[must_use]
    pub fn after(limit: Duration) -> Self {
        let now = Instant::now();
        Self {
            at: now.checked_add(limit).unwrap_or(now + FAR_FUTURE),
            limit,
        }
    }

    /// Returns true once the deadline is reached.
    #[must_use]
    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Returns true if waiting `wait` would still end before the deadline.
    #[must_use]
    pub fn leaves(&self, wait: Duration) -> bool {
        Instant::now().checked_add(wait).is_some_and(|end| end < self.at)
    }

    /// The error reported when the deadline is reached.
    #[must_use]
    pub fn to_error(&self) -> PipelineError {
        PipelineError::Timeout {
            duration: self.limit,
        }
    }

    /// Runs `operation` until the deadline, dropping it if the deadline comes first.
    pub async fn race<T, Fut>(&self, operation: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        match tokio::time::timeout_at(self.at, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(limit_ms = duration_ms(self.limit), "Overall deadline reached");
                Err(self.to_error())
            }
        }
    }
}

/// Milliseconds in `duration`, saturating for log fields.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs `operation` with an optional time bound, always racing cancellation.
pub async fn run_guarded<T, Fut>(
    timeout: Option<&TimeoutSpec>,
    token: &CancellationToken,
    operation: Fut,
) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, PipelineError>>,
{
    match timeout {
        Some(spec) => spec.guard(token, operation).await,
        None => {
            token.check()?;
            tokio::select! {
                biased;
                () = token.cancelled() => Err(token.to_error()),
                result = operation => result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn slow(value: u32, after: Duration) -> Result<u32, PipelineError> {
        tokio::time::sleep(after).await;
        Ok(value)
    }

    #[test]
    fn test_as_duration() {
        assert_eq!(TimeoutSpec::millis(250).as_duration(), Duration::from_millis(250));
        assert_eq!(TimeoutSpec::seconds(30).as_duration(), Duration::from_secs(30));
        assert_eq!(TimeoutSpec::minutes(10).as_duration(), Duration::from_secs(600));
        assert_eq!(
            TimeoutSpec::new(1, TimeUnit::Hours).as_duration(),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_validate() {
        assert!(TimeoutSpec::seconds(0).validate().is_err());
        assert!(TimeoutSpec::seconds(1).validate().is_ok());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(TimeoutSpec::minutes(10).to_string(), "10min");

        let spec: TimeoutSpec = serde_json::from_str(r#"{"duration": 5, "unit": "minutes"}"#).unwrap();
        assert_eq!(spec, TimeoutSpec::minutes(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_returns_its_result() {
        let token = CancellationToken::new();
        let result = TimeoutSpec::seconds(10)
            .guard(&token, slow(7, Duration::from_secs(3)))
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_error_passes_through() {
        let token = CancellationToken::new();
        let result: Result<(), _> = TimeoutSpec::seconds(10)
            .guard(&token, async { Err(PipelineError::command_failure("make", 2, "")) })
            .await;
        assert_eq!(result.unwrap_err().kind(), "CommandFailure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out() {
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let err = TimeoutSpec::seconds(10)
            .guard(&token, slow(7, Duration::from_secs(60)))
            .await
            .unwrap_err();

        match err {
            PipelineError::Timeout { duration } => assert_eq!(duration, Duration::from_secs(10)),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wins_over_wait() {
        let token = Arc::new(CancellationToken::new());
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            remote.cancel("stop");
        });

        let err = run_guarded(None, &token, slow(1, Duration::from_secs(600)))
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_budget_per_retry_attempt() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let c = &calls;
        let t = &token;
        let guard = TimeoutSpec::seconds(10);

        // Each attempt takes 8s: within a per-attempt bound of 10s even though
        // the three attempts together take 24s.
        let result = RetryPolicy::new(3)
            .execute("test", &token, |_| async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                guard
                    .guard(t, async move {
                        tokio::time::sleep(Duration::from_secs(8)).await;
                        if n < 3 {
                            Err(PipelineError::command_failure("deploy", 1, ""))
                        } else {
                            Ok(n)
                        }
                    })
                    .await
            })
            .await
            .unwrap();

        assert_eq!(result.value, 3);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_by_enclosing_policy() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let c = &calls;
        let t = &token;

        let err = RetryPolicy::new(2)
            .execute("test", &token, |_| async move {
                c.fetch_add(1, Ordering::SeqCst);
                TimeoutSpec::seconds(1)
                    .guard(t, slow(0, Duration::from_secs(5)))
                    .await
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.root_cause().kind(), "Timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_shared_across_calls() {
        let deadline = Deadline::after(Duration::from_secs(10));

        assert_eq!(deadline.race(slow(1, Duration::from_secs(6))).await.unwrap(), 1);
        assert!(!deadline.has_passed());
        assert!(deadline.leaves(Duration::from_secs(3)));
        assert!(!deadline.leaves(Duration::from_secs(4)));

        // Only 4s remain, so a second 6s operation does not fit.
        let err = deadline.race(slow(2, Duration::from_secs(6))).await.unwrap_err();
        match err {
            PipelineError::Timeout { duration } => assert_eq!(duration, Duration::from_secs(10)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(deadline.has_passed());
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
