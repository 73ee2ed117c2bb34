//! Lifecycle events for observability.
//!
//! The orchestrator reports run progress to an injected [`EventSink`].
//! There is no process-wide sink; each orchestrator owns its own.

mod sink;

pub use sink::{CollectedEvent, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run was accepted and its trace created.
pub const ORCHESTRATION_STARTED: &str = "orchestration.started";
/// A planning error was answered with the fallback choice.
pub const PLANNER_FALLBACK: &str = "planner.fallback";
/// A stage worker is about to run.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage worker replied successfully.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage worker failed, timed out or panicked.
pub const STAGE_FAILED: &str = "stage.failed";
/// The run finished through its termination policy.
pub const ORCHESTRATION_COMPLETED: &str = "orchestration.completed";
/// The run hit a fatal fault or was cancelled.
pub const ORCHESTRATION_FAILED: &str = "orchestration.failed";
