//! Stages: named units of work.
//!
//! A [`Stage`] pairs a [`StageAction`] with the recovery policies wrapped
//! around it (retry, timeout) and its own post-hooks.

mod stage;

pub use stage::{Stage, StageExecution};

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;
use crate::pipeline::Deadline;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// What a stage action sees on each attempt.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Pipeline name.
    pub pipeline: String,
    /// Run identifier.
    pub run_id: String,
    /// Stage name.
    pub stage: String,
    /// 1-based attempt number within the stage's retry budget.
    pub attempt: u32,
    /// The run's cancellation token.
    pub token: Arc<CancellationToken>,
    /// End of the run's overall time budget, if it has one.
    pub deadline: Option<Deadline>,
}

impl StageContext {
    /// Creates a context for the first attempt of a stage.
    pub fn new(
        pipeline: impl Into<String>,
        run_id: impl Into<String>,
        stage: impl Into<String>,
        token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id: run_id.into(),
            stage: stage.into(),
            attempt: 1,
            token,
            deadline: None,
        }
    }

    /// Sets the overall deadline the stage must finish by.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Deadline>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns a copy for the given attempt.
    #[must_use]
    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

/// The primary side effect of a stage.
///
/// Return `Ok(())` for success, a [`PipelineError::Tolerable`] failure for
/// an outcome that should not block downstream stages, and any other error
/// for a failure.
#[async_trait]
pub trait StageAction: Send + Sync + Debug {
    /// Performs one attempt.
    async fn run(&self, ctx: &StageContext) -> Result<(), PipelineError>;
}

/// An async closure used as a stage action.
pub struct FnAction {
    label: String,
    func: Box<dyn Fn(StageContext) -> BoxFuture<'static, Result<(), PipelineError>> + Send + Sync>,
}

impl Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("label", &self.label).finish()
    }
}

#[async_trait]
impl StageAction for FnAction {
    async fn run(&self, ctx: &StageContext) -> Result<(), PipelineError> {
        (self.func)(ctx.clone()).await
    }
}

/// Wraps an async closure as a stage action.
pub fn action_fn<F, Fut>(label: impl Into<String>, func: F) -> Arc<dyn StageAction>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    Arc::new(FnAction {
        label: label.into(),
        func: Box::new(move |ctx| -> BoxFuture<'static, Result<(), PipelineError>> {
            Box::pin(func(ctx))
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_action_fn_receives_context() {
        let action = action_fn("check", |ctx: StageContext| async move {
            if ctx.attempt == 2 {
                Ok(())
            } else {
                Err(PipelineError::command_failure(ctx.stage, 1, ""))
            }
        });

        let ctx = StageContext::new("deploy", "run-1", "Build", Arc::new(CancellationToken::new()));
        assert!(action.run(&ctx).await.is_err());
        assert!(action.run(&ctx.for_attempt(2)).await.is_ok());
        assert!(format!("{action:?}").contains("check"));
    }
}
