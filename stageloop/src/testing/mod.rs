//! Testing utilities for orchestration runs.
//!
//! This module provides:
//! - Stage worker doubles (fixed, failing, panicking, slow, recording)
//! - Scripted and panicking decision providers, a scripted completion service
//! - Registry fixtures
//! - Trace assertions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_confidence_bounds, assert_loop_free, assert_stage_sequence, assert_steps_ordered,
    assert_stopped_with,
};
pub use fixtures::{fixed_registry, TestRegistry};
pub use mocks::{
    FailingStage, FixedStage, PanickingPlanner, PanickingStage, RecordingStage,
    ScriptedCompletionService, ScriptedPlanner, SequenceStage, SlowStage,
};
