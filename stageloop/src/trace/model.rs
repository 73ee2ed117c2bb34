//! Trace data model and export format.

use crate::core::{StepOutcome, StopReason, TraceStatus};
use crate::registry::StageId;
use crate::utils::{generate_uuid_v7, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Identifier of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(Uuid);

impl TraceId {
    /// Generates a new time-ordered trace id.
    #[must_use]
    pub fn new() -> Self {
        Self(generate_uuid_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TraceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The ordered, append-only record of one orchestration run.
///
/// Only the trace recorder mutates a trace; everyone else sees it through
/// shared immutable snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    trace_id: TraceId,
    goal: String,
    steps: Vec<StepOutcome>,
    status: TraceStatus,
    created_at: Timestamp,
    completed_at: Option<Timestamp>,
    stop_reason: Option<StopReason>,
    final_confidence: Option<f64>,
}

impl Trace {
    /// Creates an empty running trace.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self::with_id(TraceId::new(), goal)
    }

    /// Creates an empty running trace with a known id.
    #[must_use]
    pub fn with_id(trace_id: TraceId, goal: impl Into<String>) -> Self {
        Self {
            trace_id,
            goal: goal.into(),
            steps: Vec::new(),
            status: TraceStatus::Running,
            created_at: now_utc(),
            completed_at: None,
            stop_reason: None,
            final_confidence: None,
        }
    }

    /// Returns the trace id.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the goal.
    #[must_use]
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Returns the recorded steps in order.
    #[must_use]
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// Returns the number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no step was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> TraceStatus {
        self.status
    }

    /// Returns when the trace was created.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns when the trace reached a terminal status.
    #[must_use]
    pub fn completed_at(&self) -> Option<Timestamp> {
        self.completed_at
    }

    /// Returns why the run stopped.
    #[must_use]
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Confidence of the last executed step, if any step ran.
    #[must_use]
    pub fn final_confidence(&self) -> Option<f64> {
        self.final_confidence
    }

    /// Returns the last recorded step.
    #[must_use]
    pub fn last_step(&self) -> Option<&StepOutcome> {
        self.steps.last()
    }

    /// Returns the ids of every stage that ran.
    #[must_use]
    pub fn executed_stage_ids(&self) -> HashSet<StageId> {
        self.steps.iter().map(|s| s.stage_id().clone()).collect()
    }

    /// Sum of all step durations.
    #[must_use]
    pub fn total_duration_ms(&self) -> f64 {
        self.steps.iter().map(StepOutcome::duration_ms).sum()
    }

    /// Summarizes the trace.
    #[must_use]
    pub fn summary(&self) -> TraceSummary {
        let succeeded = self.steps.iter().filter(|s| s.success()).count();
        let average_confidence = if self.steps.is_empty() {
            None
        } else {
            let total: f64 = self.steps.iter().map(StepOutcome::confidence).sum();
            Some(total / self.steps.len() as f64)
        };

        TraceSummary {
            steps: self.steps.len(),
            succeeded,
            failed: self.steps.len() - succeeded,
            average_confidence,
            total_duration_ms: self.total_duration_ms(),
        }
    }

    /// Builds the export document handed to audit and storage collaborators.
    #[must_use]
    pub fn export(&self) -> TraceExport {
        TraceExport {
            trace_id: self.trace_id,
            goal: self.goal.clone(),
            steps: self
                .steps
                .iter()
                .map(|s| StepExport {
                    step_no: s.step_no(),
                    stage_id: s.stage_id().clone(),
                    rationale: s.rationale().to_string(),
                    confidence: s.confidence(),
                    duration_ms: s.duration_ms(),
                    success: s.success(),
                    timestamp: s.timestamp(),
                    metadata: s.metadata().clone(),
                })
                .collect(),
            status: self.status,
            stop_reason: self.stop_reason.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            total_duration_ms: self.total_duration_ms(),
            final_confidence: self.final_confidence,
        }
    }

    /// Appends a step.
    ///
    /// Panics if the trace is terminal or the step number is out of order;
    /// both are contract breaches of the single writer.
    pub(crate) fn push_step(&mut self, outcome: StepOutcome) {
        assert!(
            !self.status.is_terminal(),
            "invariant violated: step appended to {} trace {}",
            self.status,
            self.trace_id
        );
        let expected = self.steps.len() + 1;
        assert_eq!(
            outcome.step_no(),
            expected,
            "invariant violated: trace {} expected step {}, got {}",
            self.trace_id,
            expected,
            outcome.step_no()
        );
        self.steps.push(outcome);
    }

    /// Moves the trace into a terminal status.
    ///
    /// Returns false, changing nothing, if it is already terminal.
    pub(crate) fn finish(
        &mut self,
        status: TraceStatus,
        stop_reason: StopReason,
        final_confidence: Option<f64>,
    ) -> bool {
        assert!(
            status.is_terminal(),
            "invariant violated: trace {} finalized with non-terminal status",
            self.trace_id
        );
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.stop_reason = Some(stop_reason);
        self.final_confidence = final_confidence;
        self.completed_at = Some(now_utc());
        true
    }
}

/// Aggregate counts over a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Number of steps.
    pub steps: usize,
    /// Steps whose worker replied successfully.
    pub succeeded: usize,
    /// Steps that failed.
    pub failed: usize,
    /// Mean step confidence.
    pub average_confidence: Option<f64>,
    /// Sum of step durations.
    pub total_duration_ms: f64,
}

/// One step in the export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExport {
    /// 1-based step number.
    pub step_no: usize,
    /// Stage that ran.
    pub stage_id: StageId,
    /// Rationale or failure diagnostic.
    pub rationale: String,
    /// Confidence within [0, 1].
    pub confidence: f64,
    /// Duration in milliseconds.
    pub duration_ms: f64,
    /// Whether the worker succeeded.
    pub success: bool,
    /// When the step finished.
    pub timestamp: Timestamp,
    /// Step metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Serializable trace export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceExport {
    /// Trace id.
    pub trace_id: TraceId,
    /// Run goal.
    pub goal: String,
    /// Ordered steps.
    pub steps: Vec<StepExport>,
    /// Final status.
    pub status: TraceStatus,
    /// Why the run stopped.
    pub stop_reason: Option<StopReason>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Completion time.
    pub completed_at: Option<Timestamp>,
    /// Sum of step durations.
    pub total_duration_ms: f64,
    /// Confidence of the last executed step.
    pub final_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageFailure;
    use crate::stages::StageReply;
    use pretty_assertions::assert_eq;

    fn ok_step(step_no: usize, stage: &str, confidence: f64, duration_ms: f64) -> StepOutcome {
        StepOutcome::succeeded(
            step_no,
            StageId::new(stage).unwrap(),
            StageReply::new(serde_json::json!(stage), confidence),
            duration_ms,
        )
    }

    fn failed_step(step_no: usize, stage: &str) -> StepOutcome {
        StepOutcome::failed(
            step_no,
            StageId::new(stage).unwrap(),
            &StageFailure::worker("boom"),
            5.0,
        )
    }

    #[test]
    fn test_new_trace_is_running() {
        let trace = Trace::new("analyze contract");
        assert_eq!(trace.status(), TraceStatus::Running);
        assert!(trace.is_empty());
        assert!(trace.stop_reason().is_none());
        assert!(trace.completed_at().is_none());
    }

    #[test]
    fn test_push_and_summary() {
        let mut trace = Trace::new("goal");
        trace.push_step(ok_step(1, "a", 0.4, 10.0));
        trace.push_step(failed_step(2, "b"));

        let summary = trace.summary();
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!((summary.average_confidence.unwrap() - 0.2).abs() < 1e-9);
        assert!((trace.total_duration_ms() - 15.0).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "expected step 1")]
    fn test_push_out_of_order_panics() {
        let mut trace = Trace::new("goal");
        trace.push_step(ok_step(2, "a", 0.4, 1.0));
    }

    #[test]
    #[should_panic(expected = "step appended to completed trace")]
    fn test_push_after_terminal_panics() {
        let mut trace = Trace::new("goal");
        trace.finish(TraceStatus::Completed, StopReason::Exhausted, None);
        trace.push_step(ok_step(1, "a", 0.4, 1.0));
    }

    #[test]
    fn test_finish_is_guarded() {
        let mut trace = Trace::new("goal");
        assert!(trace.finish(TraceStatus::Completed, StopReason::ThresholdReached, Some(0.9)));
        assert!(!trace.finish(TraceStatus::Failed, StopReason::RegistryError, None));

        assert_eq!(trace.status(), TraceStatus::Completed);
        assert_eq!(trace.stop_reason(), Some(&StopReason::ThresholdReached));
        assert_eq!(trace.final_confidence(), Some(0.9));
        assert!(trace.completed_at().is_some());
    }

    #[test]
    fn test_executed_stage_ids() {
        let mut trace = Trace::new("goal");
        trace.push_step(ok_step(1, "a", 0.1, 1.0));
        trace.push_step(ok_step(2, "b", 0.1, 1.0));

        let ids = trace.executed_stage_ids();
        assert!(ids.contains("a"));
        assert!(ids.contains("b"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_export_shape() {
        let mut trace = Trace::new("summarize");
        trace.push_step(ok_step(1, "summarize", 0.85, 20.0));
        trace.finish(TraceStatus::Completed, StopReason::ThresholdReached, Some(0.85));

        let json = serde_json::to_value(trace.export()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["stop_reason"], "threshold_reached");
        assert_eq!(json["total_duration_ms"], 20.0);
        assert_eq!(json["steps"][0]["step_no"], 1);
        assert_eq!(json["steps"][0]["stage_id"], "summarize");
        assert!(json["steps"][0].get("output").is_none());
        assert_eq!(json["trace_id"], trace.trace_id().to_string());
    }

    #[test]
    fn test_export_round_trip_preserves_steps() {
        let mut trace = Trace::new("goal");
        trace.push_step(failed_step(1, "extract"));
        let export = trace.export();

        let back: TraceExport =
            serde_json::from_str(&serde_json::to_string(&export).unwrap()).unwrap();
        assert_eq!(back, export);
    }
}
