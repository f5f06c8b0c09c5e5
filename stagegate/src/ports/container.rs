//! Container service port.

use super::command::{CommandOutput, CommandRunner};
use crate::errors::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Manages the named services the pipeline depends on.
///
/// Only the success or failure of each call matters to the engine.
#[async_trait]
pub trait ContainerService: Send + Sync {
    /// Builds every service image.
    async fn build(&self) -> Result<(), PipelineError>;

    /// Starts the given services detached; all services when empty.
    async fn up(&self, services: &[String]) -> Result<(), PipelineError>;

    /// Stops and removes every service.
    async fn down(&self) -> Result<(), PipelineError>;

    /// Lists service status.
    async fn ps(&self) -> Result<String, PipelineError>;

    /// Returns the last `tail` log lines of a service.
    async fn logs(&self, service: &str, tail: usize) -> Result<String, PipelineError>;

    /// Runs a command inside a running service.
    async fn exec(&self, service: &str, command: &str) -> Result<CommandOutput, PipelineError>;
}

/// Quotes a value for `sh`.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// [`ContainerService`] backed by `docker compose`.
#[derive(Clone)]
pub struct ComposeContainerService {
    runner: Arc<dyn CommandRunner>,
    compose_file: PathBuf,
    project: String,
    working_dir: PathBuf,
    command_timeout: Option<Duration>,
}

impl std::fmt::Debug for ComposeContainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeContainerService")
            .field("compose_file", &self.compose_file)
            .field("project", &self.project)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl ComposeContainerService {
    /// Creates a compose service for one project.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        compose_file: impl Into<PathBuf>,
        project: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            compose_file: compose_file.into(),
            project: project.into(),
            working_dir: working_dir.into(),
            command_timeout: None,
        }
    }

    /// Bounds every compose invocation.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Returns the working directory compose runs in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Renders the full command line for a compose subcommand.
    #[must_use]
    pub fn command_line(&self, args: &str) -> String {
        format!(
            "docker compose -f {} -p {} {}",
            shell_quote(&self.compose_file.to_string_lossy()),
            shell_quote(&self.project),
            args
        )
    }

    async fn run(&self, args: &str) -> Result<CommandOutput, PipelineError> {
        let command = self.command_line(args);
        self.runner
            .execute(&command, &self.working_dir, self.command_timeout)
            .await
    }

    async fn run_checked(&self, args: &str) -> Result<CommandOutput, PipelineError> {
        let command = self.command_line(args);
        self.runner
            .execute(&command, &self.working_dir, self.command_timeout)
            .await?
            .into_result(&command)
    }
}

#[async_trait]
impl ContainerService for ComposeContainerService {
    async fn build(&self) -> Result<(), PipelineError> {
        self.run_checked("build").await.map(|_| ())
    }

    async fn up(&self, services: &[String]) -> Result<(), PipelineError> {
        let mut args = String::from("up -d");
        for service in services {
            args.push(' ');
            args.push_str(&shell_quote(service));
        }
        info!(project = %self.project, services = ?services, "Starting services");
        self.run_checked(&args).await.map(|_| ())
    }

    async fn down(&self) -> Result<(), PipelineError> {
        info!(project = %self.project, "Tearing down services");
        self.run_checked("down --volumes --remove-orphans").await.map(|_| ())
    }

    async fn ps(&self) -> Result<String, PipelineError> {
        self.run_checked("ps").await.map(|out| out.stdout)
    }

    async fn logs(&self, service: &str, tail: usize) -> Result<String, PipelineError> {
        let args = format!("logs --no-color --tail {tail} {}", shell_quote(service));
        self.run_checked(&args).await.map(|out| out.stdout)
    }

    async fn exec(&self, service: &str, command: &str) -> Result<CommandOutput, PipelineError> {
        let args = format!("exec -T {} sh -c {}", shell_quote(service), shell_quote(command));
        self.run(&args).await
    }
}
