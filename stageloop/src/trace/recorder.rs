//! Single-writer trace recorder with snapshot publication.

use super::{Trace, TraceId};
use crate::core::{StepOutcome, StopReason, TraceStatus};
use crate::registry::StageId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A consistent published view of a run.
#[derive(Debug, Clone)]
pub struct TraceView {
    /// The trace as of the last publication.
    pub trace: Arc<Trace>,
    /// The stage currently executing, if any.
    pub in_flight: Option<StageId>,
}

/// Read-only handle on the latest published [`TraceView`].
///
/// Readers clone two pointers under a read lock; they never see a
/// partially updated trace.
#[derive(Debug, Clone)]
pub struct TraceWatch {
    view: Arc<RwLock<TraceView>>,
}

impl TraceWatch {
    /// Returns the latest view.
    #[must_use]
    pub fn view(&self) -> TraceView {
        self.view.read().clone()
    }

    /// Returns the latest trace.
    #[must_use]
    pub fn trace(&self) -> Arc<Trace> {
        Arc::clone(&self.view.read().trace)
    }
}

/// Records the steps of one run.
///
/// The recorder owns the working trace. Once a [`TraceWatch`] has been
/// handed out, every mutation publishes a fresh immutable copy for it.
/// Unwatched recorders never copy the trace.
#[derive(Debug)]
pub struct TraceRecorder {
    trace: Trace,
    in_flight: Option<StageId>,
    view: Arc<RwLock<TraceView>>,
    watched: AtomicBool,
}

impl TraceRecorder {
    /// Creates a recorder for a new trace.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self::with_id(TraceId::new(), goal)
    }

    /// Creates a recorder for a new trace with a known id.
    #[must_use]
    pub fn with_id(trace_id: TraceId, goal: impl Into<String>) -> Self {
        let trace = Trace::with_id(trace_id, goal);
        let view = Arc::new(RwLock::new(TraceView {
            trace: Arc::new(trace.clone()),
            in_flight: None,
        }));
        Self {
            trace,
            in_flight: None,
            view,
            watched: AtomicBool::new(false),
        }
    }

    /// Returns the trace id.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace.trace_id()
    }

    /// Returns the working trace.
    #[must_use]
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Returns a reader handle.
    ///
    /// The first call publishes the current state.
    #[must_use]
    pub fn watch(&self) -> TraceWatch {
        if !self.watched.swap(true, Ordering::SeqCst) {
            self.publish();
        }
        TraceWatch {
            view: Arc::clone(&self.view),
        }
    }

    /// The step number the next appended outcome must carry.
    #[must_use]
    pub fn next_step_no(&self) -> usize {
        self.trace.len() + 1
    }

    /// Marks a stage as executing.
    pub fn begin_stage(&mut self, stage_id: StageId) {
        self.in_flight = Some(stage_id);
        self.publish_if_watched();
    }

    /// Appends a step outcome.
    ///
    /// # Panics
    ///
    /// Panics if the trace is terminal or the step number is not the next
    /// one in sequence.
    pub fn append(&mut self, outcome: StepOutcome) {
        self.trace.push_step(outcome);
        self.in_flight = None;
        self.publish_if_watched();
    }

    /// Moves the trace into a terminal status.
    ///
    /// Only the first call has an effect. Later calls are logged and
    /// return `false`.
    pub fn finalize(
        &mut self,
        status: TraceStatus,
        stop_reason: StopReason,
        final_confidence: Option<f64>,
    ) -> bool {
        let reason = stop_reason.to_string();
        if !self.trace.finish(status, stop_reason, final_confidence) {
            warn!(
                trace_id = %self.trace.trace_id(),
                status = %self.trace.status(),
                ignored_reason = %reason,
                "Trace already finalized"
            );
            return false;
        }
        self.in_flight = None;
        self.publish_if_watched();
        true
    }

    /// Consumes the recorder, returning the trace.
    #[must_use]
    pub fn into_trace(self) -> Trace {
        self.trace
    }

    fn publish_if_watched(&self) {
        if self.watched.load(Ordering::SeqCst) {
            self.publish();
        }
    }

    fn publish(&self) {
        let next = TraceView {
            trace: Arc::new(self.trace.clone()),
            in_flight: self.in_flight.clone(),
        };
        *self.view.write() = next;
    }
}
