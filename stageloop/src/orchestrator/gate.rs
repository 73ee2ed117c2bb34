//! Confidence gate: the termination policy evaluated after every step.

use crate::config::OrchestratorConfig;
use crate::core::{StepOutcome, StopReason};

/// Result of evaluating the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Plan another step.
    Continue,
    /// End the run as completed.
    Stop(StopReason),
}

impl GateVerdict {
    /// Returns true for `Stop`.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

/// Decides whether a run stops after a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceGate {
    threshold: f64,
    max_steps: usize,
}

impl ConfidenceGate {
    /// Creates a gate.
    #[must_use]
    pub fn new(threshold: f64, max_steps: usize) -> Self {
        Self {
            threshold,
            max_steps,
        }
    }

    /// Creates the gate described by a configuration.
    #[must_use]
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.confidence_threshold, config.max_steps)
    }

    /// Returns the confidence threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns the step budget.
    #[must_use]
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Evaluates the latest step.
    ///
    /// The threshold is checked before the step budget, and only a
    /// successful step can reach it.
    #[must_use]
    pub fn evaluate(&self, last: &StepOutcome, steps_taken: usize) -> GateVerdict {
        if last.success() && last.confidence() >= self.threshold {
            GateVerdict::Stop(StopReason::ThresholdReached)
        } else if steps_taken >= self.max_steps {
            GateVerdict::Stop(StopReason::MaxStepsReached)
        } else {
            GateVerdict::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageFailure;
    use crate::registry::StageId;
    use crate::stages::StageReply;

    fn ok(confidence: f64) -> StepOutcome {
        StepOutcome::succeeded(
            1,
            StageId::new("a").unwrap(),
            StageReply::new(serde_json::json!(null), confidence),
            1.0,
        )
    }

    #[test]
    fn test_threshold_reached() {
        let gate = ConfidenceGate::new(0.8, 10);
        assert_eq!(
            gate.evaluate(&ok(0.85), 1),
            GateVerdict::Stop(StopReason::ThresholdReached)
        );
        assert_eq!(
            gate.evaluate(&ok(0.8), 1),
            GateVerdict::Stop(StopReason::ThresholdReached)
        );
    }

    #[test]
    fn test_below_threshold_continues() {
        let gate = ConfidenceGate::new(0.8, 10);
        assert_eq!(gate.evaluate(&ok(0.79), 1), GateVerdict::Continue);
    }

    #[test]
    fn test_max_steps() {
        let gate = ConfidenceGate::new(0.8, 3);
        assert_eq!(gate.evaluate(&ok(0.3), 2), GateVerdict::Continue);
        assert_eq!(
            gate.evaluate(&ok(0.3), 3),
            GateVerdict::Stop(StopReason::MaxStepsReached)
        );
    }

    #[test]
    fn test_threshold_wins_over_max_steps() {
        let gate = ConfidenceGate::new(0.5, 1);
        assert_eq!(
            gate.evaluate(&ok(0.9), 1),
            GateVerdict::Stop(StopReason::ThresholdReached)
        );
    }

    #[test]
    fn test_failed_step_never_passes_threshold() {
        let gate = ConfidenceGate::new(0.0, 10);
        let failed = StepOutcome::failed(
            1,
            StageId::new("a").unwrap(),
            &StageFailure::worker("x"),
            1.0,
        );
        assert_eq!(gate.evaluate(&failed, 1), GateVerdict::Continue);
        assert!(!gate.evaluate(&failed, 1).is_stop());
    }

    #[test]
    fn test_from_config() {
        let gate = ConfidenceGate::from_config(&OrchestratorConfig::default());
        assert!((gate.threshold() - 0.8).abs() < f64::EPSILON);
        assert_eq!(gate.max_steps(), 10);
    }
}
