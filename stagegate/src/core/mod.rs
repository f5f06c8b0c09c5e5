//! Core domain model types for stagegate.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage outcomes, execution states and lifecycle hook categories
//! - Per-stage and per-attempt run records
//! - Pipeline lifecycle events

mod event;
mod outcome;
mod record;

pub use event::PipelineEvent;
pub use outcome::{LifecycleCategory, StageOutcome, StageState};
pub use record::{PipelineAttempt, StageRecord};
