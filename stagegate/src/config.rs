//! Pipeline configuration.
//!
//! Loaded from YAML or JSON, then adjusted by `STAGEGATE_*` environment
//! variables and finally by command-line flags.

use crate::errors::PipelineError;
use crate::pipeline::{PipelineSettings, TimeoutSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "STAGEGATE_";

/// Per-stage adjustments to retry and timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageOverride {
    /// Per-attempt bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
    /// Retry budget, including the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Delay between attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(PipelineError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Polling budget for a readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Maximum probe attempts.
    pub max_attempts: u32,
    /// Seconds between attempts.
    pub interval_secs: u64,
}

impl HealthCheckConfig {
    /// Returns the interval as a `Duration`.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Settings of the build/test/deploy pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Compose file describing every service.
    pub compose_file: PathBuf,
    /// Compose project name.
    pub project_name: String,
    /// Directory commands run in.
    pub working_dir: PathBuf,
    /// Services started before the test suite.
    pub infrastructure_services: Vec<String>,
    /// Service whose readiness gates the test suite.
    pub database_service: String,
    /// Command run inside `database_service` to check readiness.
    pub database_ready_command: String,
    /// Test suite command; its exit code decides the test stage outcome.
    pub test_command: String,
    /// Services started by the deploy stage.
    pub app_services: Vec<String>,
    /// URL the integration test polls.
    pub app_url: String,
    /// Text the page at `app_url` must contain.
    pub expected_content: String,
    /// Budget for the database readiness check.
    pub database_health: HealthCheckConfig,
    /// Budget for the application readiness check.
    pub app_health: HealthCheckConfig,
    /// Per-request timeout of the HTTP prober.
    pub http_timeout_secs: u64,
    /// Bound on each `docker compose` invocation; unbounded when absent.
    pub compose_timeout_secs: Option<u64>,
    /// Where artifacts are written.
    pub artifact_dir: PathBuf,
    /// Log lines kept per service when dumping logs.
    pub log_tail_lines: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("docker-compose.yml"),
            project_name: "stagegate".to_string(),
            working_dir: PathBuf::from("."),
            infrastructure_services: vec!["db".to_string()],
            database_service: "db".to_string(),
            database_ready_command: "pg_isready".to_string(),
            test_command: "pytest".to_string(),
            app_services: vec!["web".to_string()],
            app_url: "http://localhost:8000/".to_string(),
            expected_content: "Welcome".to_string(),
            database_health: HealthCheckConfig {
                max_attempts: 10,
                interval_secs: 3,
            },
            app_health: HealthCheckConfig {
                max_attempts: 12,
                interval_secs: 10,
            },
            http_timeout_secs: 5,
            compose_timeout_secs: Some(900),
            artifact_dir: PathBuf::from("artifacts"),
            log_tail_lines: 100,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Bound on the whole run.
    pub overall_timeout: Option<TimeoutSpec>,
    /// Additional passes over the stages after a failed pass.
    pub pipeline_retries: u32,
    /// Seconds between passes.
    pub pipeline_retry_delay_secs: u64,
    /// Per-stage overrides keyed by stage name.
    pub overrides: BTreeMap<String, StageOverride>,
    /// Logging options.
    pub logging: LoggingConfig,
    /// Deploy pipeline settings.
    pub deploy: DeployConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "deploy".to_string(),
            overall_timeout: Some(TimeoutSpec::minutes(60)),
            pipeline_retries: 0,
            pipeline_retry_delay_secs: 30,
            overrides: BTreeMap::new(),
            logging: LoggingConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from a YAML or JSON file.
    ///
    /// The format follows the extension; anything else is parsed as YAML.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "json" => Self::from_json(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parses JSON.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), PipelineError> {
        self.apply_env_from(std::env::vars())
    }

    /// Applies `STAGEGATE_*` overrides from the given variables.
    ///
    /// Unknown `STAGEGATE_*` names are ignored.
    pub fn apply_env_from<I>(&mut self, vars: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "NAME" => self.name = value,
                "PIPELINE_RETRIES" => self.pipeline_retries = parse_env(&key, &value)?,
                "PIPELINE_RETRY_DELAY_SECS" => self.pipeline_retry_delay_secs = parse_env(&key, &value)?,
                "OVERALL_TIMEOUT_MINUTES" => {
                    self.overall_timeout = Some(TimeoutSpec::minutes(parse_env(&key, &value)?));
                }
                "LOG_LEVEL" => self.logging.level = value,
                "LOG_FORMAT" => self.logging.format = value.parse()?,
                "COMPOSE_FILE" => self.deploy.compose_file = PathBuf::from(value),
                "PROJECT_NAME" => self.deploy.project_name = value,
                "WORKING_DIR" => self.deploy.working_dir = PathBuf::from(value),
                "TEST_COMMAND" => self.deploy.test_command = value,
                "APP_URL" => self.deploy.app_url = value,
                "EXPECTED_CONTENT" => self.deploy.expected_content = value,
                "ARTIFACT_DIR" => self.deploy.artifact_dir = PathBuf::from(value),
                "COMPOSE_TIMEOUT_SECS" => {
                    self.deploy.compose_timeout_secs = Some(parse_env(&key, &value)?);
                }
                _ => continue,
            }
            debug!(variable = %key, "Applied environment override");
        }
        Ok(())
    }

    /// Checks the configuration invariants.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("name must not be empty".to_string()));
        }
        if let Some(timeout) = &self.overall_timeout {
            timeout.validate()?;
        }
        for (stage, o) in &self.overrides {
            if o.max_attempts == Some(0) {
                return Err(PipelineError::Config(format!(
                    "override for '{stage}': max_attempts must be >= 1"
                )));
            }
            if let Some(timeout) = &o.timeout {
                timeout.validate().map_err(|e| {
                    PipelineError::Config(format!("override for '{stage}': {e}"))
                })?;
            }
        }
        for (label, health) in [
            ("database_health", &self.deploy.database_health),
            ("app_health", &self.deploy.app_health),
        ] {
            if health.max_attempts == 0 {
                return Err(PipelineError::Config(format!("{label}.max_attempts must be >= 1")));
            }
        }
        if self.deploy.app_url.trim().is_empty() {
            return Err(PipelineError::Config("deploy.app_url must not be empty".to_string()));
        }
        if self.deploy.test_command.trim().is_empty() {
            return Err(PipelineError::Config("deploy.test_command must not be empty".to_string()));
        }
        if self.deploy.http_timeout_secs == 0 {
            return Err(PipelineError::Config("deploy.http_timeout_secs must be positive".to_string()));
        }
        if self.deploy.compose_timeout_secs == Some(0) {
            return Err(PipelineError::Config("deploy.compose_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Returns the orchestrator settings.
    #[must_use]
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            overall_timeout: self.overall_timeout,
            pipeline_retries: self.pipeline_retries,
            retry_delay: Duration::from_secs(self.pipeline_retry_delay_secs),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{key}: cannot parse '{value}'")))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TimeUnit;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.deploy.app_health.max_attempts, 12);
        assert_eq!(config.deploy.app_health.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = PipelineConfig::from_yaml(
            r"
name: release
pipeline_retries: 1
overall_timeout: { duration: 30, unit: minutes }
overrides:
  Deploy:
    max_attempts: 5
    timeout: { duration: 90, unit: seconds }
deploy:
  app_url: http://web:8000/
",
        )
        .unwrap();

        assert_eq!(config.name, "release");
        assert_eq!(config.pipeline_retries, 1);
        assert_eq!(config.overall_timeout, Some(TimeoutSpec::new(30, TimeUnit::Minutes)));
        assert_eq!(config.overrides["Deploy"].max_attempts, Some(5));
        assert_eq!(config.deploy.app_url, "http://web:8000/");
        assert_eq!(config.deploy.test_command, "pytest");
    }

    #[test]
    fn test_from_json() {
        let config = PipelineConfig::from_json(r#"{"name": "ci", "logging": {"format": "json"}}"#).unwrap();
        assert_eq!(config.name, "ci");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_override_field_rejected() {
        let result = PipelineConfig::from_yaml("overrides:\n  Build:\n    retries: 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PipelineConfig::default();
        let parsed = PipelineConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagegate.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"pipeline_retries": 2}}"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.pipeline_retries, 2);

        assert!(PipelineConfig::from_file(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_from(vars(&[
                ("STAGEGATE_PIPELINE_RETRIES", "2"),
                ("STAGEGATE_OVERALL_TIMEOUT_MINUTES", "15"),
                ("STAGEGATE_LOG_FORMAT", "JSON"),
                ("STAGEGATE_APP_URL", "http://staging/"),
                ("STAGEGATE_COMPOSE_TIMEOUT_SECS", "300"),
                ("STAGEGATE_UNKNOWN", "ignored"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.pipeline_retries, 2);
        assert_eq!(config.overall_timeout, Some(TimeoutSpec::minutes(15)));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.deploy.app_url, "http://staging/");
        assert_eq!(config.deploy.compose_timeout_secs, Some(300));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_from(vars(&[("STAGEGATE_PIPELINE_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("STAGEGATE_PIPELINE_RETRIES"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();
        config.overall_timeout = Some(TimeoutSpec::seconds(0));
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.overrides.insert(
            "Build".to_string(),
            StageOverride {
                max_attempts: Some(0),
                ..StageOverride::default()
            },
        );
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.deploy.app_health.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.deploy.compose_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings() {
        let mut config = PipelineConfig::default();
        config.pipeline_retries = 1;
        config.pipeline_retry_delay_secs = 5;

        let settings = config.settings();
        assert_eq!(settings.pipeline_retries, 1);
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
        assert_eq!(settings.overall_timeout, Some(TimeoutSpec::minutes(60)));
    }
}
