//! Workflow status reporting.
//!
//! [`WorkflowStatus`] is derived from a trace snapshot on every read and is
//! never stored. [`StatusHandle`] is what pollers hold while a run is in
//! progress.

use crate::core::{StopReason, TraceStatus};
use crate::registry::StageId;
use crate::trace::{Trace, TraceId, TraceView, TraceWatch};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Point-in-time status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// The run.
    pub trace_id: TraceId,
    /// Trace status.
    pub status: TraceStatus,
    /// The executing stage, else the last one that ran.
    pub current_stage: Option<StageId>,
    /// Stages that completed successfully, in first-completion order.
    #[serde(rename = "completed_stages")]
    pub completed_stage_ids: Vec<StageId>,
    /// Stages that failed, in first-failure order.
    #[serde(rename = "failed_stages")]
    pub failed_stage_ids: Vec<StageId>,
    /// Share of registered stages completed, within [0, 100].
    pub progress_percentage: f64,
    /// Sum of step durations.
    pub total_execution_time_ms: f64,
    /// Number of recorded steps.
    pub steps_taken: usize,
    /// Why the run stopped, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl WorkflowStatus {
    /// Derives a status from a published view.
    #[must_use]
    pub fn from_view(view: &TraceView, registered_stages: usize) -> Self {
        let mut status = Self::from_trace(&view.trace, registered_stages);
        if let Some(stage) = &view.in_flight {
            status.current_stage = Some(stage.clone());
        }
        status
    }

    /// Derives a status from a trace.
    #[must_use]
    pub fn from_trace(trace: &Trace, registered_stages: usize) -> Self {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut seen_completed = HashSet::new();
        let mut seen_failed = HashSet::new();

        for step in trace.steps() {
            let id = step.stage_id();
            if step.success() {
                if seen_completed.insert(id.clone()) {
                    completed.push(id.clone());
                }
            } else if seen_failed.insert(id.clone()) {
                failed.push(id.clone());
            }
        }

        Self {
            trace_id: trace.trace_id(),
            status: trace.status(),
            current_stage: trace.last_step().map(|s| s.stage_id().clone()),
            progress_percentage: progress_percentage(completed.len(), registered_stages),
            completed_stage_ids: completed,
            failed_stage_ids: failed,
            total_execution_time_ms: trace.total_duration_ms(),
            steps_taken: trace.len(),
            stop_reason: trace.stop_reason().cloned(),
        }
    }
}

/// `completed / registered * 100`, clamped to `[0, 100]`.
///
/// An empty registry reports 0.
#[must_use]
pub fn progress_percentage(completed: usize, registered: usize) -> f64 {
    if registered == 0 {
        return 0.0;
    }
    (completed as f64 / registered as f64 * 100.0).clamp(0.0, 100.0)
}

/// Poller handle on a run.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    trace_id: TraceId,
    watch: TraceWatch,
    registered_stages: usize,
}

impl StatusHandle {
    /// Creates a handle over a trace watch.
    #[must_use]
    pub fn new(trace_id: TraceId, watch: TraceWatch, registered_stages: usize) -> Self {
        Self {
            trace_id,
            watch,
            registered_stages,
        }
    }

    /// Returns the trace id.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Computes the current status.
    #[must_use]
    pub fn snapshot(&self) -> WorkflowStatus {
        WorkflowStatus::from_view(&self.watch.view(), self.registered_stages)
    }

    /// Returns the latest published trace.
    #[must_use]
    pub fn trace(&self) -> Arc<Trace> {
        self.watch.trace()
    }

    /// Returns true once the run has reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.watch.trace().status().is_terminal()
    }
}
