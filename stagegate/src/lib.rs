//! # Stagegate
//!
//! A sequential build/test/deploy pipeline engine.
//!
//! Stagegate runs named stages strictly in order and decides, before each
//! one, whether the run so far allows it to start:
//!
//! - **Retries**: bounded re-attempts with a fixed delay and an optional
//!   fallback action, per stage or around the whole pipeline
//! - **Timeouts**: per-attempt and whole-run bounds
//! - **Health checks**: polling a readiness probe on a fixed interval
//! - **Gating**: `Failure` and `Aborted` block every later stage, `Unstable`
//!   does not
//! - **Lifecycle hooks**: exactly one of `success`, `unstable`, `failure` or
//!   `aborted` per run, plus `always`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagegate::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("release")
//!     .stage(Stage::new("Build", build).with_retry(RetryPolicy::new(3)))?
//!     .stage(Stage::new("Deploy", deploy).with_timeout(TimeoutSpec::minutes(10)))?
//!     .hook(LifecycleCategory::Always, teardown)
//!     .build()?;
//!
//! let report = pipeline.run(Arc::new(CancellationToken::new())).await;
//! println!("{}", report.category);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{PipelineConfig, StageOverride};
    pub use crate::core::{LifecycleCategory, PipelineAttempt, StageOutcome, StageRecord};
    pub use crate::errors::PipelineError;
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        hook_fn, GatingRule, HealthCheckSpec, HookContext, Pipeline, PipelineBuilder,
        PipelineReport, RetryPolicy, TimeoutSpec,
    };
    pub use crate::stages::{action_fn, Stage, StageAction, StageContext};
}
