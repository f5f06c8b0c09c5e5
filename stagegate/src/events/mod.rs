//! Event sinks for pipeline observability.
//!
//! The orchestrator emits a [`PipelineEvent`](crate::core::PipelineEvent) at
//! every lifecycle transition. Sinks decide what to do with them: drop them,
//! log them, or collect them for assertions.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
