//! Assertions over execution traces.

use crate::core::{StopReason, TraceStatus};
use crate::trace::Trace;
use std::collections::HashSet;

/// Asserts `steps[i].step_no == i + 1` for every step.
pub fn assert_steps_ordered(trace: &Trace) {
    for (i, step) in trace.steps().iter().enumerate() {
        assert_eq!(
            step.step_no(),
            i + 1,
            "Step at index {} has step_no {}",
            i,
            step.step_no()
        );
    }
}

/// Asserts no stage ran twice, except those listed as re-entrant.
pub fn assert_loop_free(trace: &Trace, reentrant: &[&str]) {
    let mut seen = HashSet::new();
    for step in trace.steps() {
        let id = step.stage_id().as_str();
        if reentrant.contains(&id) {
            continue;
        }
        assert!(
            seen.insert(id.to_string()),
            "Stage '{}' ran more than once (step {})",
            id,
            step.step_no()
        );
    }
}

/// Asserts every step confidence lies within `[0, 1]` and failed steps
/// carry zero.
pub fn assert_confidence_bounds(trace: &Trace) {
    for step in trace.steps() {
        let confidence = step.confidence();
        assert!(
            (0.0..=1.0).contains(&confidence),
            "Step {} confidence {} is outside [0, 1]",
            step.step_no(),
            confidence
        );
        if !step.success() {
            assert!(
                confidence == 0.0,
                "Failed step {} has non-zero confidence {}",
                step.step_no(),
                confidence
            );
        }
    }
}

/// Asserts the trace ended with `status` for `reason`.
pub fn assert_stopped_with(trace: &Trace, status: TraceStatus, reason: &StopReason) {
    assert_eq!(
        trace.status(),
        status,
        "Expected status {}, got {}",
        status,
        trace.status()
    );
    assert_eq!(
        trace.stop_reason(),
        Some(reason),
        "Expected stop reason {}, got {:?}",
        reason,
        trace.stop_reason()
    );
    assert!(trace.completed_at().is_some(), "Terminal trace has no completed_at");
}

/// Asserts the stage ids of the trace, in order.
pub fn assert_stage_sequence(trace: &Trace, expected: &[&str]) {
    let actual: Vec<&str> = trace.steps().iter().map(|s| s.stage_id().as_str()).collect();
    assert_eq!(actual, expected, "Unexpected stage sequence");
}
