//! Pipeline builder with validation.

use super::{GatingRule, HookAction, LifecycleHooks, Pipeline, PipelineSettings, TimeoutSpec};
use crate::config::StageOverride;
use crate::core::LifecycleCategory;
use crate::errors::PipelineError;
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::Stage;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builder for creating validated pipelines.
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Stage>,
    names: HashSet<String>,
    gating: GatingRule,
    hooks: LifecycleHooks,
    settings: PipelineSettings,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            names: HashSet::new(),
            gating: GatingRule::default(),
            hooks: LifecycleHooks::new(),
            settings: PipelineSettings::default(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its name is already taken.
    pub fn stage(mut self, stage: Stage) -> Result<Self, PipelineError> {
        stage.validate()?;
        if !self.names.insert(stage.name().to_string()) {
            return Err(PipelineError::Config(format!(
                "duplicate stage name '{}'",
                stage.name()
            )));
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Sets the gating rule.
    #[must_use]
    pub fn gating(mut self, rule: GatingRule) -> Self {
        self.gating = rule;
        self
    }

    /// Registers a pipeline-level lifecycle hook.
    #[must_use]
    pub fn hook(mut self, category: LifecycleCategory, hook: Arc<dyn HookAction>) -> Self {
        self.hooks.register(category, hook);
        self
    }

    /// Bounds the whole run.
    #[must_use]
    pub fn overall_timeout(mut self, timeout: TimeoutSpec) -> Self {
        self.settings.overall_timeout = Some(timeout);
        self
    }

    /// Retries the whole stage sequence after a failed pass.
    #[must_use]
    pub fn pipeline_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.settings.pipeline_retries = retries;
        self.settings.retry_delay = delay;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Applies per-stage configuration overrides by stage name.
    ///
    /// # Errors
    ///
    /// Returns an error if an override names an unknown stage or leaves a
    /// stage invalid.
    pub fn apply_overrides(
        mut self,
        overrides: &BTreeMap<String, StageOverride>,
    ) -> Result<Self, PipelineError> {
        for (name, stage_override) in overrides {
            let stage = self
                .stages
                .iter_mut()
                .find(|s| s.name() == name)
                .ok_or_else(|| PipelineError::Config(format!("override for unknown stage '{name}'")))?;
            stage.apply_override(stage_override);
            stage.validate()?;
            debug!(stage = %name, "Applied stage override");
        }
        Ok(self)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages or the overall timeout
    /// is not positive.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::Config(format!(
                "pipeline '{}' has no stages",
                self.name
            )));
        }
        if let Some(timeout) = &self.settings.overall_timeout {
            timeout.validate()?;
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            gating: self.gating,
            hooks: self.hooks,
            settings: self.settings,
            events: self.events,
        })
    }
}
