//! Core domain model types for stageloop.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Trace status, loop state and stop reason enums
//! - The immutable step outcome

mod outcome;
mod status;

pub use outcome::{clamp_confidence, StepOutcome};
pub use status::{LoopState, StopReason, TraceStatus};
