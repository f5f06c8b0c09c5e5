//! Testing utilities for stagegate pipelines.
//!
//! This module provides:
//! - Scripted stage actions, hooks and readiness probes
//! - Scripted command runner and container service
//! - Assertions over run reports

mod assertions;
mod collaborators;
mod mocks;

pub use assertions::{assert_category, assert_executed, assert_outcomes, assert_skipped};
pub use collaborators::{FakeContainerService, ScriptedCommandRunner};
pub use mocks::{RecordingHook, ScriptedAction, ScriptedProbe};
