//! Command runner port.

use crate::errors::PipelineError;
use crate::pipeline::duration_ms;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into a `CommandFailure`.
    pub fn into_result(self, command: &str) -> Result<Self, PipelineError> {
        if self.success() {
            Ok(self)
        } else {
            Err(PipelineError::command_failure(
                command,
                self.exit_code,
                self.stderr.trim_end(),
            ))
        }
    }
}

/// Executes external commands.
///
/// A non-zero exit is reported through [`CommandOutput::exit_code`], not as
/// an error; `Err` means the runner itself could not run the command.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` in `working_dir`, optionally bounded by `timeout`.
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, PipelineError>;
}

/// Runs commands through `sh -c`.
///
/// The child is killed when its future is dropped, so a timeout guard or an
/// abort that abandons the call does not leave the process running.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    /// Creates a new shell runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, PipelineError> {
        debug!(command, working_dir = %working_dir.display(), "Running command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!(command, timeout_ms = duration_ms(limit), "Command timed out");
                    return Err(PipelineError::Timeout { duration: limit });
                }
            },
            None => child.await?,
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command, exit_code = result.exit_code, "Command finished");
        Ok(result)
    }
}
