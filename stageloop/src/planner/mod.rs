//! Decision providers.
//!
//! A [`DecisionProvider`] chooses the next stage of a run, or ends it.
//! Providers are untrusted: the orchestrator checks every choice against
//! the candidate list and falls back to [`fallback_decision`] whenever a
//! provider errors, times out or proposes something unusable.

mod completion;
mod decision;
mod fallback;

pub use completion::{
    parse_decision, CompletionPlanner, CompletionRequest, CompletionService,
    PLANNER_INSTRUCTIONS,
};
#[cfg(test)]
pub use completion::MockCompletionService;
pub use decision::{Decision, PlanningRequest, StepSummary};
pub use fallback::{fallback_decision, FallbackPlanner};

use crate::errors::PlanningError;
use async_trait::async_trait;

/// Chooses the next stage given goal, context and history.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Short provider name, recorded in step metadata.
    fn name(&self) -> &str;

    /// Plans the next step.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanningError`] when no usable decision can be produced.
    async fn plan(&self, request: &PlanningRequest) -> Result<Decision, PlanningError>;
}
