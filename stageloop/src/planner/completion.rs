//! Decision provider backed by an external completion service.

use super::{Decision, DecisionProvider, PlanningRequest};
use crate::core::StopReason;
use crate::errors::{CompletionError, PlanningError};
use crate::registry::StageId;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Instructions sent with every planning request.
pub const PLANNER_INSTRUCTIONS: &str = "Choose the next analysis stage for the goal. \
Pick only from `candidates`. Reply with a single JSON object: \
{\"next_stage\": string|null, \"rationale\": string, \"expected_confidence\": number, \
\"should_continue\": bool, \"stop_reason\": string|null}.";

/// Structured request handed to a completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Fixed instructions.
    pub instructions: String,
    /// Goal, context, history and candidates as JSON.
    pub payload: serde_json::Value,
}

impl CompletionRequest {
    /// Builds the request for one planning round.
    #[must_use]
    pub fn for_planning(request: &PlanningRequest) -> Self {
        let candidates: Vec<serde_json::Value> = request
            .descriptors
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "capability": d.capability,
                    "reentrant": d.reentrant,
                    "description": d.description,
                })
            })
            .collect();

        Self {
            instructions: PLANNER_INSTRUCTIONS.to_string(),
            payload: serde_json::json!({
                "goal": request.goal,
                "context": request.context,
                "history": request.history,
                "candidates": candidates,
                "next_step_no": request.next_step_no(),
            }),
        }
    }
}

/// External text-completion collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Sends a request and returns the raw reply text.
    ///
    /// # Errors
    ///
    /// Returns a [`CompletionError`] when the service cannot answer.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Reply as loosely typed by a model; converted into a [`Decision`].
#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default, alias = "stage", alias = "next_stage_id")]
    next_stage: Option<String>,
    #[serde(default, alias = "reasoning")]
    rationale: Option<String>,
    #[serde(default, alias = "confidence")]
    expected_confidence: Option<f64>,
    #[serde(default)]
    should_continue: Option<bool>,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Extracts the JSON object from a reply, tolerating code fences and
/// surrounding prose.
fn extract_json(reply: &str) -> &str {
    let body = fenced_block()
        .and_then(|re| re.captures(reply))
        .and_then(|c| c.get(1))
        .map_or(reply, |m| m.as_str())
        .trim();

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

/// Parses a raw completion reply into a validated decision.
///
/// # Errors
///
/// Returns `PlanningError::Completion(EmptyReply)` for a blank reply,
/// `Unparseable` when no JSON object can be read, and `InvalidShape` when
/// the object does not describe a usable decision.
pub fn parse_decision(reply: &str) -> Result<Decision, PlanningError> {
    if reply.trim().is_empty() {
        return Err(CompletionError::EmptyReply.into());
    }

    let value: serde_json::Value = serde_json::from_str(extract_json(reply))
        .map_err(|e| PlanningError::unparseable(e.to_string()))?;
    if !value.is_object() {
        return Err(PlanningError::invalid_shape("reply is not a JSON object"));
    }

    let raw: RawDecision =
        serde_json::from_value(value).map_err(|e| PlanningError::invalid_shape(e.to_string()))?;

    let next_stage = raw
        .next_stage
        .filter(|s| !s.trim().is_empty())
        .map(|s| StageId::new(s.trim()))
        .transpose()
        .map_err(|e| PlanningError::invalid_shape(e.to_string()))?;

    let should_continue = raw.should_continue.unwrap_or(next_stage.is_some());
    let decision = Decision {
        next_stage: if should_continue { next_stage } else { None },
        rationale: raw.rationale.unwrap_or_default(),
        expected_confidence: raw.expected_confidence,
        should_continue,
        stop_reason: if should_continue {
            None
        } else {
            raw.stop_reason.as_deref().map(StopReason::from)
        },
    };
    decision.validate()?;
    Ok(decision)
}

/// Plans by asking a [`CompletionService`].
///
/// Every failure surfaces as a [`PlanningError`]; the orchestrator answers
/// those with the fallback choice.
#[derive(Clone)]
pub struct CompletionPlanner {
    service: Arc<dyn CompletionService>,
}

impl CompletionPlanner {
    /// Creates a planner over a completion service.
    #[must_use]
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }
}

impl fmt::Debug for CompletionPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPlanner").finish_non_exhaustive()
    }
}

#[async_trait]
impl DecisionProvider for CompletionPlanner {
    fn name(&self) -> &str {
        "completion"
    }

    async fn plan(&self, request: &PlanningRequest) -> Result<Decision, PlanningError> {
        let completion = CompletionRequest::for_planning(request);
        let reply = self.service.complete(&completion).await?;
        debug!(
            trace_id = %request.trace_id,
            reply_len = reply.len(),
            "Planner reply received"
        );
        parse_decision(&reply)
    }
}
