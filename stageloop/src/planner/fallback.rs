//! Deterministic fallback planning.

use super::{Decision, DecisionProvider, PlanningRequest};
use crate::core::StopReason;
use crate::errors::PlanningError;
use crate::registry::StageId;
use async_trait::async_trait;

/// Picks the first candidate, or stops with `exhausted` if there is none.
///
/// Candidates arrive in registration order, so this is the first
/// still-available stage.
#[must_use]
pub fn fallback_decision(candidates: &[StageId]) -> Decision {
    match candidates.first() {
        Some(stage) => Decision::run(stage.clone(), "fallback: first available stage"),
        None => Decision::stop(StopReason::Exhausted, "fallback: no stages remaining"),
    }
}

/// A decision provider that always takes the fallback choice.
///
/// This is the default provider of an orchestrator built without one, and
/// runs every registered stage once in registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackPlanner;

impl FallbackPlanner {
    /// Creates a new fallback planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionProvider for FallbackPlanner {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn plan(&self, request: &PlanningRequest) -> Result<Decision, PlanningError> {
        Ok(fallback_decision(&request.candidates))
    }
}
