//! Normalized result of one stage execution.

use crate::errors::StageFailure;
use crate::registry::StageId;
use crate::stages::StageReply;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Clamps a reported confidence into `[0, 1]`.
///
/// Returns the clamped value and whether it had to be adjusted. `NaN`
/// maps to `0.0`.
#[must_use]
pub fn clamp_confidence(confidence: f64) -> (f64, bool) {
    if confidence.is_nan() {
        return (0.0, true);
    }
    let clamped = confidence.clamp(0.0, 1.0);
    (clamped, (clamped - confidence).abs() > f64::EPSILON)
}

/// The outcome of one step of a run.
///
/// Immutable once created: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    step_no: usize,
    stage_id: StageId,
    rationale: String,
    confidence: f64,
    duration_ms: f64,
    success: bool,
    timestamp: Timestamp,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    /// Published output; merged into the context, not exported.
    #[serde(skip)]
    output: Option<serde_json::Value>,
}

impl StepOutcome {
    /// Builds the outcome of a successful worker reply.
    #[must_use]
    pub fn succeeded(step_no: usize, stage_id: StageId, reply: StageReply, duration_ms: f64) -> Self {
        let (confidence, clamped) = clamp_confidence(reply.confidence);
        let mut metadata = reply.metadata;
        if clamped {
            metadata.insert(
                "confidence_clamped_from".to_string(),
                serde_json::json!(reply.confidence.to_string()),
            );
        }

        Self {
            step_no,
            stage_id,
            rationale: reply.rationale,
            confidence,
            duration_ms: duration_ms.max(0.0),
            success: true,
            timestamp: now_utc(),
            metadata,
            output: Some(reply.output),
        }
    }

    /// Builds the outcome of a failed invocation.
    ///
    /// Failed steps always carry zero confidence.
    #[must_use]
    pub fn failed(
        step_no: usize,
        stage_id: StageId,
        failure: &StageFailure,
        duration_ms: f64,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error_kind".to_string(), serde_json::json!(failure.kind));

        Self {
            step_no,
            stage_id,
            rationale: failure.to_string(),
            confidence: 0.0,
            duration_ms: duration_ms.max(0.0),
            success: false,
            timestamp: now_utc(),
            metadata,
            output: None,
        }
    }

    /// Adds a metadata entry before the outcome is recorded.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 1-based position in the trace.
    #[must_use]
    pub fn step_no(&self) -> usize {
        self.step_no
    }

    /// The stage that ran.
    #[must_use]
    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }

    /// Worker rationale, or the failure diagnostic.
    #[must_use]
    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    /// Confidence within `[0, 1]`.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Whether the worker produced a usable reply.
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    /// When the step finished.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Step metadata.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// The published output of a successful step.
    #[must_use]
    pub fn output(&self) -> Option<&serde_json::Value> {
        self.output.as_ref()
    }
}
