//! Logging setup.
//!
//! Every component logs through `tracing` with structured fields; this
//! module installs the subscriber that renders them.

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::PipelineError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the log filter.
///
/// `RUST_LOG` wins when set and valid; otherwise `config.level` is used.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, PipelineError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| PipelineError::Config(format!("invalid log level '{}': {e}", config.level)))
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the level directive does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), PipelineError> {
    let registry = tracing_subscriber::registry().with(env_filter(config)?);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| PipelineError::Config(format!("cannot install log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "stagegate=debug,warn".to_string(),
            format: LogFormat::Text,
        };
        let filter = env_filter(&config).unwrap();
        assert!(filter.to_string().contains("stagegate=debug"));
    }

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "stagegate=loud".to_string(),
            format: LogFormat::Json,
        };
        assert!(env_filter(&config).is_err());
    }
}
