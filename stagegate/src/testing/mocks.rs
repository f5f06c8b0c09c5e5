//! Scripted stage actions, hooks and probes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::errors::PipelineError;
use crate::pipeline::{HookAction, HookContext, Probe};
use crate::stages::{StageAction, StageContext};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    FailTimes(u32),
    AlwaysFail,
    Tolerable,
    Sleep(Duration),
}

/// A stage action with scripted behavior that records its attempts.
#[derive(Debug)]
pub struct ScriptedAction {
    behavior: Behavior,
    attempts: Mutex<Vec<u32>>,
}

impl ScriptedAction {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Succeeds on every attempt.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with(Behavior::FailTimes(0))
    }

    /// Fails with a `CommandFailure` on the first `n` calls, then succeeds.
    #[must_use]
    pub fn failing_times(n: u32) -> Self {
        Self::with(Behavior::FailTimes(n))
    }

    /// Fails with a `CommandFailure` on every call.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::with(Behavior::AlwaysFail)
    }

    /// Fails tolerably on every call.
    #[must_use]
    pub fn tolerable_failure() -> Self {
        Self::with(Behavior::Tolerable)
    }

    /// Sleeps for `duration`, then succeeds.
    #[must_use]
    pub fn sleeping(duration: Duration) -> Self {
        Self::with(Behavior::Sleep(duration))
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        u32::try_from(self.attempts.lock().len()).unwrap_or(u32::MAX)
    }

    /// Returns the attempt number passed on each call.
    #[must_use]
    pub fn attempts_seen(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl StageAction for ScriptedAction {
    async fn run(&self, ctx: &StageContext) -> Result<(), PipelineError> {
        let call = {
            let mut attempts = self.attempts.lock();
            attempts.push(ctx.attempt);
            u32::try_from(attempts.len()).unwrap_or(u32::MAX)
        };

        let failure = || PipelineError::command_failure(format!("{} step", ctx.stage), 1, "scripted failure");
        match self.behavior {
            Behavior::FailTimes(n) if call <= n => Err(failure()),
            Behavior::FailTimes(_) => Ok(()),
            Behavior::AlwaysFail => Err(failure()),
            Behavior::Tolerable => Err(failure().tolerable()),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

/// A hook that records every context it is dispatched with.
#[derive(Debug, Default)]
pub struct RecordingHook {
    contexts: Mutex<Vec<HookContext>>,
    fail_with: Option<String>,
}

impl RecordingHook {
    /// Creates a hook that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hook that records, then fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            contexts: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    /// Returns the number of times the hook ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the contexts the hook ran with.
    #[must_use]
    pub fn contexts(&self) -> Vec<HookContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl HookAction for RecordingHook {
    async fn run(&self, ctx: &HookContext) -> Result<(), PipelineError> {
        self.contexts.lock().push(ctx.clone());
        match &self.fail_with {
            Some(message) => Err(PipelineError::Config(message.clone())),
            None => Ok(()),
        }
    }
}

/// A probe that answers from a script.
///
/// Once the script is used up the last answer repeats; an empty script
/// always answers false.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    /// Answers each value in turn.
    #[must_use]
    pub fn sequence(answers: Vec<bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            last: Mutex::new(false),
            calls: AtomicU32::new(0),
        }
    }

    /// Answers false `k - 1` times, then true.
    #[must_use]
    pub fn ready_on(k: u32) -> Self {
        let mut answers = vec![false; k.saturating_sub(1) as usize];
        answers.push(true);
        Self::sequence(answers)
    }

    /// Always answers false.
    #[must_use]
    pub fn never() -> Self {
        Self::sequence(Vec::new())
    }

    /// Always answers true.
    #[must_use]
    pub fn always() -> Self {
        Self::sequence(vec![true])
    }

    /// Returns the number of checks made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock();
        if let Some(answer) = self.answers.lock().pop_front() {
            *last = answer;
        }
        *last
    }

    fn describe(&self) -> String {
        "scripted probe".to_string()
    }
}
