//! Scripted external collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use crate::errors::PipelineError;
use crate::ports::{CommandOutput, CommandRunner, ContainerService};

#[derive(Debug)]
struct Rule {
    pattern: String,
    outputs: VecDeque<CommandOutput>,
    last: CommandOutput,
    delay: Option<Duration>,
}

/// A command runner that answers from rules and records every command.
///
/// The first rule whose pattern occurs in the command answers. Commands no
/// rule matches succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedCommandRunner {
    /// Creates a runner where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands containing `pattern` with `output`.
    #[must_use]
    pub fn respond(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.respond_sequence(pattern, vec![output])
    }

    /// Answers successive matching commands with `outputs`, repeating the last.
    #[must_use]
    pub fn respond_sequence(self, pattern: impl Into<String>, outputs: Vec<CommandOutput>) -> Self {
        let last = outputs.last().cloned().unwrap_or_default();
        self.rules.lock().push(Rule {
            pattern: pattern.into(),
            outputs: outputs.into(),
            last,
            delay: None,
        });
        self
    }

    /// Makes commands containing `pattern` take `delay` before succeeding.
    #[must_use]
    pub fn delay(self, pattern: impl Into<String>, delay: Duration) -> Self {
        self.rules.lock().push(Rule {
            pattern: pattern.into(),
            outputs: VecDeque::new(),
            last: CommandOutput::default(),
            delay: Some(delay),
        });
        self
    }

    /// Returns every command executed, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Returns how many executed commands contained `pattern`.
    #[must_use]
    pub fn count(&self, pattern: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn execute(
        &self,
        command: &str,
        _working_dir: &Path,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, PipelineError> {
        self.commands.lock().push(command.to_string());

        let (output, delay) = {
            let mut rules = self.rules.lock();
            match rules.iter_mut().find(|r| command.contains(&r.pattern)) {
                Some(rule) => {
                    let output = rule.outputs.pop_front().unwrap_or_else(|| rule.last.clone());
                    (output, rule.delay)
                }
                None => (CommandOutput::default(), None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(output)
    }
}

/// An in-memory container service.
///
/// Records each operation as a short string (`"build"`, `"up web"`,
/// `"down"`, `"logs web"`, `"exec db"`).
#[derive(Debug, Default)]
pub struct FakeContainerService {
    calls: Mutex<Vec<String>>,
    build_failures: Mutex<u32>,
    failing_services: Mutex<Vec<String>>,
    exec_outputs: Mutex<VecDeque<CommandOutput>>,
    logs: Mutex<HashMap<String, String>>,
}

impl FakeContainerService {
    /// Creates a service where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` builds fail.
    pub fn fail_builds(&self, n: u32) {
        *self.build_failures.lock() = n;
    }

    /// Makes every `up` that includes `service` fail.
    pub fn fail_up(&self, service: impl Into<String>) {
        self.failing_services.lock().push(service.into());
    }

    /// Answers successive `exec` calls; succeeds once the script is used up.
    pub fn script_exec(&self, outputs: Vec<CommandOutput>) {
        *self.exec_outputs.lock() = outputs.into();
    }

    /// Sets the log text returned for a service.
    pub fn set_logs(&self, service: impl Into<String>, logs: impl Into<String>) {
        self.logs.lock().insert(service.into(), logs.into());
    }

    /// Returns every recorded operation, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns how many recorded operations start with `op`.
    #[must_use]
    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(op)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ContainerService for FakeContainerService {
    async fn build(&self) -> Result<(), PipelineError> {
        self.record("build".to_string());
        let mut failures = self.build_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(PipelineError::command_failure("docker compose build", 1, "network timeout"));
        }
        Ok(())
    }

    async fn up(&self, services: &[String]) -> Result<(), PipelineError> {
        self.record(format!("up {}", services.join(" ")).trim_end().to_string());
        if services.iter().any(|s| self.failing_services.lock().contains(s)) {
            return Err(PipelineError::command_failure("docker compose up", 1, "port in use"));
        }
        Ok(())
    }

    async fn down(&self) -> Result<(), PipelineError> {
        self.record("down".to_string());
        Ok(())
    }

    async fn ps(&self) -> Result<String, PipelineError> {
        self.record("ps".to_string());
        Ok(String::new())
    }

    async fn logs(&self, service: &str, _tail: usize) -> Result<String, PipelineError> {
        self.record(format!("logs {service}"));
        Ok(self.logs.lock().get(service).cloned().unwrap_or_default())
    }

    async fn exec(&self, service: &str, _command: &str) -> Result<CommandOutput, PipelineError> {
        self.record(format!("exec {service}"));
        Ok(self
            .exec_outputs
            .lock()
            .pop_front()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}
