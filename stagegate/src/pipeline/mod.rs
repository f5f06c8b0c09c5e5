//! Stage execution and failure recovery.
//!
//! This module provides:
//! - Retry policy executor and timeout guard
//! - Health-check poller
//! - Gating rules and lifecycle hooks
//! - Pipeline builder and orchestrator

mod builder;
mod gating;
mod health;
mod hooks;
mod integration_tests;
mod orchestrator;
mod retry;
mod timeout;

pub use builder::PipelineBuilder;
pub use gating::{GateDecision, GatingRule};
pub use health::{CompoundProbe, FnProbe, HealthCheckSpec, Probe};
pub use hooks::{hook_fn, HookAction, HookContext, LifecycleHooks};
pub use orchestrator::{Pipeline, PipelineReport, PipelineSettings};
pub use retry::{Attempted, FallbackAction, FallbackTiming, RetryPolicy};
pub use timeout::{run_guarded, Deadline, TimeUnit, TimeoutSpec};
pub(crate) use timeout::duration_ms;
