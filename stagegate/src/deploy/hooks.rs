//! Hooks attached to the deploy pipeline.

use crate::core::LifecycleCategory;
use crate::errors::PipelineError;
use crate::pipeline::{HookAction, HookContext};
use crate::ports::{save_best_effort, ArtifactStore, ContainerService, NotificationSink};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Turns a stage name into an artifact-friendly slug.
pub(crate) fn slug(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Saves the tail of each service's logs after a stage.
pub struct CaptureLogs {
    pub(crate) containers: Arc<dyn ContainerService>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) services: Vec<String>,
    pub(crate) tail: usize,
}

#[async_trait]
impl HookAction for CaptureLogs {
    async fn run(&self, ctx: &HookContext) -> Result<(), PipelineError> {
        let prefix = ctx.stage.as_deref().map_or_else(|| "pipeline".to_string(), slug);
        for service in &self.services {
            match self.containers.logs(service, self.tail).await {
                Ok(text) => {
                    let name = format!("logs/{prefix}-{service}.log");
                    save_best_effort(self.artifacts.as_ref(), &name, text.as_bytes()).await;
                }
                Err(err) => warn!(service = %service, error = %err, "Could not capture logs"),
            }
        }
        Ok(())
    }
}

/// Persists and announces the last known logs of every service.
pub struct DumpLogsOnFailure {
    pub(crate) containers: Arc<dyn ContainerService>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) services: Vec<String>,
    pub(crate) tail: usize,
}

#[async_trait]
impl HookAction for DumpLogsOnFailure {
    async fn run(&self, ctx: &HookContext) -> Result<(), PipelineError> {
        for service in &self.services {
            let text = match self.containers.logs(service, self.tail).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(service = %service, error = %err, "Could not fetch logs for failure report");
                    continue;
                }
            };
            save_best_effort(
                self.artifacts.as_ref(),
                &format!("logs/failure-{service}.log"),
                text.as_bytes(),
            )
            .await;
            self.notifier
                .notify(&format!(
                    "[{}] last {} log lines of '{service}':\n{}",
                    ctx.pipeline,
                    self.tail,
                    text.trim_end()
                ))
                .await;
        }
        Ok(())
    }
}

/// Announces the final category.
pub struct AnnounceResult {
    pub(crate) notifier: Arc<dyn NotificationSink>,
}

#[async_trait]
impl HookAction for AnnounceResult {
    async fn run(&self, ctx: &HookContext) -> Result<(), PipelineError> {
        let line = match ctx.category {
            LifecycleCategory::Success => "succeeded",
            LifecycleCategory::Unstable => "finished unstable: some tests failed",
            LifecycleCategory::Failure => "failed",
            LifecycleCategory::Aborted => "was aborted",
            LifecycleCategory::Always => return Ok(()),
        };
        self.notifier
            .notify(&format!("Pipeline '{}' (run {}) {line}", ctx.pipeline, ctx.run_id))
            .await;
        Ok(())
    }
}

/// Tears every service down.
pub struct Teardown {
    pub(crate) containers: Arc<dyn ContainerService>,
}

#[async_trait]
impl HookAction for Teardown {
    async fn run(&self, _ctx: &HookContext) -> Result<(), PipelineError> {
        self.containers.down().await
    }
}
