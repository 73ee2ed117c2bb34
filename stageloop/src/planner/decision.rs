//! Planning request and decision types.

use crate::context::ContextSnapshot;
use crate::core::{StepOutcome, StopReason};
use crate::errors::PlanningError;
use crate::registry::{StageDescriptor, StageId};
use crate::trace::TraceId;
use serde::{Deserialize, Serialize};

/// Compact view of one executed step, as shown to a decision provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    /// 1-based step number.
    pub step_no: usize,
    /// Stage that ran.
    pub stage_id: StageId,
    /// Step confidence.
    pub confidence: f64,
    /// Whether the worker succeeded.
    pub success: bool,
    /// Worker rationale or failure diagnostic.
    pub rationale: String,
}

impl From<&StepOutcome> for StepSummary {
    fn from(step: &StepOutcome) -> Self {
        Self {
            step_no: step.step_no(),
            stage_id: step.stage_id().clone(),
            confidence: step.confidence(),
            success: step.success(),
            rationale: step.rationale().to_string(),
        }
    }
}

/// Everything a decision provider sees when choosing the next stage.
#[derive(Debug, Clone, Serialize)]
pub struct PlanningRequest {
    /// The run asking.
    pub trace_id: TraceId,
    /// The run's goal.
    pub goal: String,
    /// Context as of this planning round.
    pub context: ContextSnapshot,
    /// Steps executed so far.
    pub history: Vec<StepSummary>,
    /// Eligible stages in registration order. Never empty.
    pub candidates: Vec<StageId>,
    /// Descriptors of the candidates, in the same order.
    pub descriptors: Vec<StageDescriptor>,
}

impl PlanningRequest {
    /// Returns true if `id` is one of the candidates.
    #[must_use]
    pub fn is_candidate(&self, id: &str) -> bool {
        self.candidates.iter().any(|c| c.as_str() == id)
    }

    /// The step number the chosen stage will run as.
    #[must_use]
    pub fn next_step_no(&self) -> usize {
        self.history.len() + 1
    }
}

/// The choice a decision provider makes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Stage to run next. Required when `should_continue` is true.
    #[serde(default)]
    pub next_stage: Option<StageId>,
    /// Why this choice was made.
    #[serde(default)]
    pub rationale: String,
    /// Confidence the provider expects the stage to reach.
    #[serde(default)]
    pub expected_confidence: Option<f64>,
    /// False to end the run.
    pub should_continue: bool,
    /// Why the run should end, when `should_continue` is false.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl Decision {
    /// Chooses a stage to run next.
    #[must_use]
    pub fn run(stage: StageId, rationale: impl Into<String>) -> Self {
        Self {
            next_stage: Some(stage),
            rationale: rationale.into(),
            expected_confidence: None,
            should_continue: true,
            stop_reason: None,
        }
    }

    /// Ends the run.
    #[must_use]
    pub fn stop(reason: StopReason, rationale: impl Into<String>) -> Self {
        Self {
            next_stage: None,
            rationale: rationale.into(),
            expected_confidence: None,
            should_continue: false,
            stop_reason: Some(reason),
        }
    }

    /// Sets the expected confidence.
    #[must_use]
    pub fn with_expected_confidence(mut self, confidence: f64) -> Self {
        self.expected_confidence = Some(confidence);
        self
    }

    /// The stop reason to record, defaulting to `planner_stop`.
    ///
    /// Reasons reserved for the engine are replaced by `planner_stop`, so a
    /// provider cannot report a fault or a gate verdict it did not observe.
    #[must_use]
    pub fn effective_stop_reason(&self) -> StopReason {
        match &self.stop_reason {
            Some(reason) if !reason.is_engine_reserved() => reason.clone(),
            _ => StopReason::PlannerStop,
        }
    }

    /// Checks the decision is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::InvalidShape` when a continuing decision
    /// names no stage, or the expected confidence is outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.should_continue && self.next_stage.is_none() {
            return Err(PlanningError::invalid_shape(
                "should_continue is true but next_stage is missing",
            ));
        }
        if let Some(expected) = self.expected_confidence {
            if !(0.0..=1.0).contains(&expected) {
                return Err(PlanningError::invalid_shape(format!(
                    "expected_confidence {expected} is outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}
