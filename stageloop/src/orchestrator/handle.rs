//! Handles on spawned runs.

use crate::cancellation::CancellationToken;
use crate::errors::OrchestratorError;
use crate::status::{StatusHandle, WorkflowStatus};
use crate::trace::{Trace, TraceId};
use tokio::task::JoinHandle;

/// Directory entry of a run started through `Orchestrator::start`.
#[derive(Debug, Clone)]
pub(crate) struct RunEntry {
    pub(crate) status: StatusHandle,
    pub(crate) cancel: CancellationToken,
}

/// Caller's handle on a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    trace_id: TraceId,
    status: StatusHandle,
    cancel: CancellationToken,
    join: JoinHandle<Trace>,
}

impl RunHandle {
    pub(crate) fn new(
        trace_id: TraceId,
        status: StatusHandle,
        cancel: CancellationToken,
        join: JoinHandle<Trace>,
    ) -> Self {
        Self {
            trace_id,
            status,
            cancel,
            join,
        }
    }

    /// Returns the trace id.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Computes the current status.
    #[must_use]
    pub fn status(&self) -> WorkflowStatus {
        self.status.snapshot()
    }

    /// Returns a cloneable status handle for pollers.
    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cancellation. Takes effect before the next stage starts.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel.cancel(reason)
    }

    /// Returns true once the run's task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run and returns its terminal trace.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Join` if the run's task was aborted or
    /// panicked.
    pub async fn join(self) -> Result<Trace, OrchestratorError> {
        self.join
            .await
            .map_err(|e| OrchestratorError::Join(e.to_string()))
    }
}
