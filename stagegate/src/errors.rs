//! Error types for the stagegate engine.
//!
//! The taxonomy mirrors the failure kinds the engine reasons about:
//! command failures are recovered by retries, timeouts are retried only by an
//! enclosing retry policy, health-check exhaustion fails the stage directly,
//! and aborts supersede everything else.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An external command exited with a non-zero status.
    #[error("command `{command}` exited with code {exit_code}")]
    CommandFailure {
        /// The command line that was executed.
        command: String,
        /// The exit code reported by the process.
        exit_code: i32,
        /// Captured standard error, kept for diagnostics.
        stderr: String,
    },

    /// A retry policy ran out of attempts.
    #[error("gave up after {attempts} attempt(s): {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure of the last attempt.
        #[source]
        source: Box<PipelineError>,
    },

    /// An attempt exceeded its time bound.
    #[error("timed out after {}", humanize(.duration))]
    Timeout {
        /// The configured bound.
        duration: Duration,
    },

    /// A health check never reported ready within its budget.
    #[error("health check not ready after {attempts} attempt(s)")]
    HealthCheckExhausted {
        /// Number of probe attempts made.
        attempts: u32,
    },

    /// External cancellation was requested.
    #[error("pipeline aborted: {reason}")]
    Aborted {
        /// The cancellation reason.
        reason: String,
    },

    /// A failure that should mark the stage unstable instead of failed.
    #[error("{0} (tolerated)")]
    Tolerable(#[source] Box<PipelineError>),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl PipelineError {
    /// Creates a command failure error.
    #[must_use]
    pub fn command_failure(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailure {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates an aborted error.
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Marks this failure as tolerable.
    ///
    /// Aborts are never downgraded.
    #[must_use]
    pub fn tolerable(self) -> Self {
        match self {
            Self::Aborted { .. } | Self::Tolerable(_) => self,
            other => Self::Tolerable(Box::new(other)),
        }
    }

    /// Returns true if this error (or the failure it wraps) is an abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        match self {
            Self::Aborted { .. } => true,
            Self::RetryExhausted { source, .. } | Self::Tolerable(source) => source.is_aborted(),
            _ => false,
        }
    }

    /// Returns true if this failure should not block downstream stages.
    #[must_use]
    pub fn is_tolerable(&self) -> bool {
        matches!(self, Self::Tolerable(_))
    }

    /// Returns the attempt count carried by the error, if any.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } | Self::HealthCheckExhausted { attempts } => {
                Some(*attempts)
            }
            Self::Tolerable(inner) => inner.attempts(),
            _ => None,
        }
    }

    /// Returns the innermost failure, unwrapping retry and tolerance wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetryExhausted { source, .. } | Self::Tolerable(source) => source.root_cause(),
            other => other,
        }
    }

    /// Returns a stable name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommandFailure { .. } => "CommandFailure",
            Self::RetryExhausted { .. } => "RetryExhausted",
            Self::Timeout { .. } => "Timeout",
            Self::HealthCheckExhausted { .. } => "HealthCheckExhausted",
            Self::Aborted { .. } => "Aborted",
            Self::Tolerable(_) => "Tolerable",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
            Self::Serialization(_) => "Serialization",
        }
    }
}

/// Serializable snapshot of a failure, stored in run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Error kind (e.g. "RetryExhausted").
    pub kind: String,
    /// Rendered message.
    pub message: String,
    /// Attempt count, when the error carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl From<&PipelineError> for ErrorSummary {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            attempts: err.attempts(),
        }
    }
}

fn humanize(duration: &Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
