//! Lifecycle hooks.
//!
//! Hooks are keyed by [`LifecycleCategory`]. A hook failure, including a
//! panic, is recorded and logged but never changes the outcome it was
//! dispatched for, and never prevents the remaining hooks from running.

use crate::core::{LifecycleCategory, StageOutcome};
use crate::errors::PipelineError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// What a hook sees when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// Pipeline name.
    pub pipeline: String,
    /// Run identifier.
    pub run_id: String,
    /// The category being dispatched.
    pub category: LifecycleCategory,
    /// The result that selected the category; `None` for an empty run.
    pub result: Option<StageOutcome>,
    /// Owning stage, for stage post-hooks.
    pub stage: Option<String>,
}

/// An operation attached to a lifecycle category.
#[async_trait]
pub trait HookAction: Send + Sync {
    /// Runs the hook.
    async fn run(&self, ctx: &HookContext) -> Result<(), PipelineError>;
}

struct FnHook<F> {
    func: F,
}

#[async_trait]
impl<F> HookAction for FnHook<F>
where
    F: Fn(HookContext) -> BoxFuture<'static, Result<(), PipelineError>> + Send + Sync,
{
    async fn run(&self, ctx: &HookContext) -> Result<(), PipelineError> {
        (self.func)(ctx.clone()).await
    }
}

/// Wraps an async closure as a hook.
pub fn hook_fn<F, Fut>(func: F) -> Arc<dyn HookAction>
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    Arc::new(FnHook {
        func: move |ctx: HookContext| -> BoxFuture<'static, Result<(), PipelineError>> { Box::pin(func(ctx)) },
    })
}

/// Hooks registered per category, run in registration order.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    hooks: HashMap<LifecycleCategory, Vec<Arc<dyn HookAction>>>,
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self.hooks.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("LifecycleHooks").field("hooks", &counts).finish()
    }
}

impl LifecycleHooks {
    /// Creates an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for a category.
    #[must_use]
    pub fn on(mut self, category: LifecycleCategory, hook: Arc<dyn HookAction>) -> Self {
        self.register(category, hook);
        self
    }

    /// Registers a hook for a category in place.
    pub fn register(&mut self, category: LifecycleCategory, hook: Arc<dyn HookAction>) {
        self.hooks.entry(category).or_default().push(hook);
    }

    /// Returns the number of hooks registered for a category.
    #[must_use]
    pub fn count(&self, category: LifecycleCategory) -> usize {
        self.hooks.get(&category).map_or(0, Vec::len)
    }

    /// Returns true if no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    /// Runs every hook registered for `ctx.category`.
    ///
    /// Returns the rendered failures; an empty vector means every hook
    /// succeeded.
    pub async fn dispatch(&self, ctx: &HookContext) -> Vec<String> {
        let Some(hooks) = self.hooks.get(&ctx.category) else {
            return Vec::new();
        };

        debug!(category = %ctx.category, count = hooks.len(), stage = ?ctx.stage, "Dispatching hooks");

        let mut failures = Vec::new();
        for hook in hooks {
            let outcome = AssertUnwindSafe(hook.run(ctx)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("hook panicked: {}", panic_message(panic.as_ref())),
            };
            error!(category = %ctx.category, stage = ?ctx.stage, error = %failure, "Lifecycle hook failed");
            failures.push(failure);
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
