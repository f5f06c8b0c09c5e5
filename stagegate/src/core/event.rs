//! Pipeline lifecycle events.

use super::{LifecycleCategory, StageOutcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event emitted while a pipeline runs.
///
/// Events are consumed by event sinks for logging, monitoring, or analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "stage.started", "stage.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (RFC 3339).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the payload as a JSON object.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::Value::Object(self.data.clone().into_iter().collect())
    }

    /// Creates a "pipeline.started" event.
    #[must_use]
    pub fn pipeline_started(pipeline: &str, run_id: &str, stage_count: usize) -> Self {
        Self::new("pipeline.started")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("stages", serde_json::json!(stage_count))
    }

    /// Creates a "pipeline.attempt" event.
    #[must_use]
    pub fn pipeline_attempt(pipeline: &str, attempt: u32) -> Self {
        Self::new("pipeline.attempt")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("attempt", serde_json::json!(attempt))
    }

    /// Creates a "pipeline.completed" event.
    #[must_use]
    pub fn pipeline_completed(pipeline: &str, result: StageOutcome, duration_ms: f64) -> Self {
        Self::new("pipeline.completed")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("result", serde_json::json!(result))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "pipeline.cancelled" event.
    #[must_use]
    pub fn pipeline_cancelled(pipeline: &str, reason: &str) -> Self {
        Self::new("pipeline.cancelled")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("reason", serde_json::json!(reason))
    }

    /// Creates a "stage.started" event.
    #[must_use]
    pub fn stage_started(stage_name: &str) -> Self {
        Self::new("stage.started").add_data("stage", serde_json::json!(stage_name))
    }

    /// Creates a "stage.completed" event.
    #[must_use]
    pub fn stage_completed(stage_name: &str, outcome: StageOutcome, attempts: u32) -> Self {
        Self::new("stage.completed")
            .add_data("stage", serde_json::json!(stage_name))
            .add_data("outcome", serde_json::json!(outcome))
            .add_data("attempts", serde_json::json!(attempts))
    }

    /// Creates a "stage.skipped" event.
    #[must_use]
    pub fn stage_skipped(stage_name: &str, reason: &str) -> Self {
        Self::new("stage.skipped")
            .add_data("stage", serde_json::json!(stage_name))
            .add_data("reason", serde_json::json!(reason))
    }

    /// Creates a "hook.failed" event.
    #[must_use]
    pub fn hook_failed(category: LifecycleCategory, error: &str) -> Self {
        Self::new("hook.failed")
            .add_data("category", serde_json::json!(category))
            .add_data("error", serde_json::json!(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = PipelineEvent::new("test.event");
        assert_eq!(event.event_type, "test.event");
        assert!(event.data.is_empty());
        assert!(event.timestamp.contains('T'));
    }

    #[test]
    fn test_stage_completed() {
        let event = PipelineEvent::stage_completed("Build", StageOutcome::Success, 3);
        assert_eq!(event.event_type, "stage.completed");
        assert_eq!(event.data.get("outcome"), Some(&serde_json::json!("SUCCESS")));
        assert_eq!(event.data.get("attempts"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_hook_failed() {
        let event = PipelineEvent::hook_failed(LifecycleCategory::Failure, "boom");
        assert_eq!(event.data.get("category"), Some(&serde_json::json!("failure")));
    }

    #[test]
    fn test_payload_is_object() {
        let event = PipelineEvent::stage_started("Deploy");
        assert_eq!(event.payload()["stage"], serde_json::json!("Deploy"));
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::new("test").add_data("x", serde_json::json!(1));
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: PipelineEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event_type, deserialized.event_type);
    }
}
