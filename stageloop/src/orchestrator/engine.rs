//! The orchestration loop.

use super::handle::{RunEntry, RunHandle};
use super::{ConfidenceGate, GateVerdict};
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::context::ContextStore;
use crate::core::{LoopState, StepOutcome, StopReason, TraceStatus};
use crate::errors::PlanningError;
use crate::events::{self, EventSink};
use crate::executor::StageExecutor;
use crate::planner::{fallback_decision, Decision, DecisionProvider, PlanningRequest, StepSummary};
use crate::registry::{RegisteredStage, StageRegistry};
use crate::status::{StatusHandle, WorkflowStatus};
use crate::trace::{Trace, TraceId, TraceRecorder};
use crate::utils::panic_message;
use dashmap::DashMap;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Initial context of a run.
pub type InitialContext = HashMap<String, serde_json::Value>;

/// The decision a planning round settled on.
struct Plan {
    decision: Decision,
    /// Set when the provider's answer was replaced by the fallback choice.
    fallback_reason: Option<PlanningError>,
}

/// Loop position, carrying what the next transition needs.
enum Phase<'a> {
    Planning,
    Executing {
        stage: &'a RegisteredStage,
        plan: Plan,
    },
    Gating,
    Finished(TraceStatus),
}

impl Phase<'_> {
    fn state(&self) -> LoopState {
        match self {
            Self::Planning => LoopState::Planning,
            Self::Executing { .. } => LoopState::Executing,
            Self::Gating => LoopState::Gating,
            Self::Finished(TraceStatus::Failed) => LoopState::Failed,
            Self::Finished(_) => LoopState::Completed,
        }
    }
}

/// Drives runs through Planning, Executing and Gating.
///
/// Holds only shared immutable state. Every run owns its own context and
/// trace, so one orchestrator serves any number of concurrent runs.
pub struct Orchestrator {
    registry: Arc<StageRegistry>,
    planner: Arc<dyn DecisionProvider>,
    config: OrchestratorConfig,
    gate: ConfidenceGate,
    executor: StageExecutor,
    events: Arc<dyn EventSink>,
    runs: DashMap<TraceId, RunEntry>,
}

impl Orchestrator {
    pub(crate) fn from_parts(
        registry: Arc<StageRegistry>,
        planner: Arc<dyn DecisionProvider>,
        config: OrchestratorConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            gate: ConfidenceGate::from_config(&config),
            executor: StageExecutor::new(config.stage_timeout()),
            registry,
            planner,
            config,
            events,
            runs: DashMap::new(),
        }
    }

    /// Returns the stage registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the decision provider's name.
    #[must_use]
    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    /// Runs a goal to completion.
    ///
    /// Always returns a terminal trace; stage and planning failures are
    /// recorded in it rather than returned.
    pub async fn run(&self, goal: impl Into<String>, initial_context: InitialContext) -> Trace {
        self.run_with_cancel(goal, initial_context, &CancellationToken::new())
            .await
    }

    /// Runs a goal to completion, honoring `cancel` between stages.
    pub async fn run_with_cancel(
        &self,
        goal: impl Into<String>,
        initial_context: InitialContext,
        cancel: &CancellationToken,
    ) -> Trace {
        let recorder = TraceRecorder::new(goal);
        self.drive(recorder, ContextStore::from_data(initial_context), cancel)
            .await
    }

    /// Spawns a run on the tokio runtime and indexes it for polling.
    ///
    /// A finished run stays queryable until [`Orchestrator::forget`] is
    /// called or it is evicted. Each call first evicts the oldest finished
    /// runs beyond `max_retained_runs`; running entries are never evicted.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        self: &Arc<Self>,
        goal: impl Into<String>,
        initial_context: InitialContext,
    ) -> RunHandle {
        self.evict_finished();

        let recorder = TraceRecorder::new(goal);
        let trace_id = recorder.trace_id();
        let status = StatusHandle::new(trace_id, recorder.watch(), self.registry.len());
        let cancel = CancellationToken::new();

        self.runs.insert(
            trace_id,
            RunEntry {
                status: status.clone(),
                cancel: cancel.clone(),
            },
        );

        let this = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            this.drive(recorder, ContextStore::from_data(initial_context), &token)
                .await
        });

        RunHandle::new(trace_id, status, cancel, join)
    }

    /// Status of a started run, if it is in the directory.
    #[must_use]
    pub fn status(&self, trace_id: TraceId) -> Option<WorkflowStatus> {
        self.runs.get(&trace_id).map(|entry| entry.status.snapshot())
    }

    /// Latest trace of a started run, if it is in the directory.
    #[must_use]
    pub fn trace(&self, trace_id: TraceId) -> Option<Arc<Trace>> {
        self.runs.get(&trace_id).map(|entry| entry.status.trace())
    }

    /// Requests cancellation of a started run.
    ///
    /// Returns false if the run is unknown or was already cancelled.
    pub fn cancel(&self, trace_id: TraceId, reason: impl Into<String>) -> bool {
        self.runs
            .get(&trace_id)
            .is_some_and(|entry| entry.cancel.cancel(reason))
    }

    /// Ids of started runs that have not reached a terminal status.
    #[must_use]
    pub fn active_runs(&self) -> Vec<TraceId> {
        self.runs
            .iter()
            .filter(|entry| !entry.status.is_finished())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Removes a run from the directory.
    pub fn forget(&self, trace_id: TraceId) -> bool {
        self.runs.remove(&trace_id).is_some()
    }

    /// Drops the oldest finished runs beyond the retention cap.
    fn evict_finished(&self) {
        let retained = self.config.max_retained_runs;
        let mut finished: Vec<_> = self
            .runs
            .iter()
            .filter(|entry| entry.status.is_finished())
            .map(|entry| (entry.status.trace().completed_at(), *entry.key()))
            .collect();
        if finished.len() <= retained {
            return;
        }

        finished.sort_unstable();
        let excess = finished.len() - retained;
        for (_, trace_id) in finished.into_iter().take(excess) {
            self.runs.remove(&trace_id);
        }
        debug!(evicted = excess, retained, "Evicted finished runs");
    }

    async fn drive(
        &self,
        recorder: TraceRecorder,
        context: ContextStore,
        cancel: &CancellationToken,
    ) -> Trace {
        let span = info_span!(
            "orchestration.run",
            trace_id = %recorder.trace_id(),
            planner = self.planner.name(),
        );
        self.run_loop(recorder, context, cancel).instrument(span).await
    }

    async fn run_loop(
        &self,
        mut recorder: TraceRecorder,
        mut context: ContextStore,
        cancel: &CancellationToken,
    ) -> Trace {
        let trace_id = recorder.trace_id();
        let goal = recorder.trace().goal().to_string();
        info!(
            stages = self.registry.len(),
            max_steps = self.config.max_steps,
            threshold = self.config.confidence_threshold,
            "Orchestration started"
        );
        self.events.try_emit(
            events::ORCHESTRATION_STARTED,
            Some(serde_json::json!({
                "trace_id": trace_id.to_string(),
                "goal": goal,
                "registered_stages": self.registry.len(),
            })),
        );

        let mut phase = Phase::Planning;
        while !phase.state().is_terminal() {
            let from = phase.state();
            phase = match phase {
                Phase::Planning => {
                    let executed = recorder.trace().executed_stage_ids();
                    let candidates = self.registry.list_available(&executed);
                    if candidates.is_empty() {
                        self.finish(&mut recorder, TraceStatus::Completed, StopReason::Exhausted)
                    } else {
                        let request = self.planning_request(&recorder, &goal, &context, candidates);
                        let plan = self.plan(&request).await;
                        self.route(&mut recorder, plan, cancel)
                    }
                }
                Phase::Executing { stage, plan } => {
                    let outcome = self
                        .execute(&mut recorder, stage, plan, &goal, &context)
                        .await;
                    context.merge_outcome(&outcome);
                    recorder.append(outcome);
                    Phase::Gating
                }
                Phase::Gating => {
                    let steps_taken = recorder.trace().len();
                    let verdict = recorder
                        .trace()
                        .last_step()
                        .map_or(GateVerdict::Continue, |last| self.gate.evaluate(last, steps_taken));
                    match verdict {
                        GateVerdict::Continue => Phase::Planning,
                        GateVerdict::Stop(reason) => {
                            self.finish(&mut recorder, TraceStatus::Completed, reason)
                        }
                    }
                }
                finished @ Phase::Finished(_) => finished,
            };
            debug!(from = %from, to = %phase.state(), "Loop transition");
        }

        recorder.into_trace()
    }

    /// Turns a planning result into the next phase.
    fn route<'a>(
        &'a self,
        recorder: &mut TraceRecorder,
        plan: Plan,
        cancel: &CancellationToken,
    ) -> Phase<'a> {
        let Some(stage_id) = plan.decision.next_stage.clone() else {
            let reason = plan.decision.effective_stop_reason();
            return self.finish(recorder, TraceStatus::Completed, reason);
        };

        match self.registry.get(stage_id.as_str()) {
            Err(e) => {
                error!(stage = %stage_id, error = %e, "Planner chose an unregistered stage");
                self.finish(recorder, TraceStatus::Failed, StopReason::RegistryError)
            }
            Ok(_) if cancel.is_cancelled() => {
                info!(reason = ?cancel.reason(), "Run cancelled before next stage");
                self.finish(recorder, TraceStatus::Failed, StopReason::Cancelled)
            }
            Ok(stage) => Phase::Executing { stage, plan },
        }
    }

    fn planning_request(
        &self,
        recorder: &TraceRecorder,
        goal: &str,
        context: &ContextStore,
        candidates: Vec<crate::registry::StageId>,
    ) -> PlanningRequest {
        let descriptors = candidates
            .iter()
            .filter_map(|id| self.registry.get(id.as_str()).ok())
            .map(|stage| stage.descriptor.clone())
            .collect();

        PlanningRequest {
            trace_id: recorder.trace_id(),
            goal: goal.to_string(),
            context: context.snapshot(),
            history: recorder.trace().steps().iter().map(StepSummary::from).collect(),
            candidates,
            descriptors,
        }
    }

    /// Asks the provider, replacing any unusable answer with the fallback.
    async fn plan(&self, request: &PlanningRequest) -> Plan {
        let timeout_ms = self.config.planner_timeout_ms;
        let call = AssertUnwindSafe(self.planner.plan(request)).catch_unwind();
        let answer = match tokio::time::timeout(self.config.planner_timeout(), call).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(payload)) => Err(PlanningError::Panicked {
                detail: panic_message(payload.as_ref()),
            }),
            Err(_) => Err(PlanningError::Timeout { timeout_ms }),
        };

        match answer.and_then(|decision| self.check_decision(request, decision)) {
            Ok(decision) => Plan {
                decision,
                fallback_reason: None,
            },
            Err(e) => {
                let decision = fallback_decision(&request.candidates);
                warn!(
                    kind = e.kind(),
                    error = %e,
                    fallback = ?decision.next_stage.as_ref().map(ToString::to_string),
                    "Planning failed, using fallback"
                );
                self.events.try_emit(
                    events::PLANNER_FALLBACK,
                    Some(serde_json::json!({
                        "trace_id": request.trace_id.to_string(),
                        "error": e.to_string(),
                        "error_kind": e.kind(),
                        "fallback_stage": decision.next_stage,
                    })),
                );
                Plan {
                    decision,
                    fallback_reason: Some(e),
                }
            }
        }
    }

    /// Rejects inconsistent decisions and registered-but-ineligible stages.
    ///
    /// Unregistered stages pass through: they end the run as a registry
    /// fault instead of falling back.
    fn check_decision(
        &self,
        request: &PlanningRequest,
        decision: Decision,
    ) -> Result<Decision, PlanningError> {
        decision.validate()?;
        if !decision.should_continue {
            return Ok(Decision {
                next_stage: None,
                ..decision
            });
        }
        if let Some(stage) = &decision.next_stage {
            if self.registry.contains(stage.as_str()) && !request.is_candidate(stage.as_str()) {
                return Err(PlanningError::IneligibleStage {
                    id: stage.to_string(),
                });
            }
        }
        Ok(decision)
    }

    async fn execute(
        &self,
        recorder: &mut TraceRecorder,
        stage: &RegisteredStage,
        plan: Plan,
        goal: &str,
        context: &ContextStore,
    ) -> StepOutcome {
        let step_no = recorder.next_step_no();
        let stage_id = stage.id().clone();
        recorder.begin_stage(stage_id.clone());

        info!(stage = %stage_id, step_no, "Stage started");
        self.events.try_emit(
            events::STAGE_STARTED,
            Some(serde_json::json!({
                "trace_id": recorder.trace_id().to_string(),
                "stage": stage_id,
                "step_no": step_no,
            })),
        );

        let mut outcome = self
            .executor
            .execute(stage, step_no, goal, context.snapshot())
            .await;

        outcome = match plan.fallback_reason {
            Some(e) => outcome
                .with_metadata("planner", serde_json::json!("fallback"))
                .with_metadata("planning_error", serde_json::json!(e.to_string()))
                .with_metadata("planning_error_kind", serde_json::json!(e.kind())),
            None => outcome.with_metadata("planner", serde_json::json!(self.planner.name())),
        };
        if !plan.decision.rationale.is_empty() {
            outcome = outcome.with_metadata(
                "decision_rationale",
                serde_json::json!(plan.decision.rationale),
            );
        }
        if let Some(expected) = plan.decision.expected_confidence {
            outcome = outcome.with_metadata("expected_confidence", serde_json::json!(expected));
        }

        let event = if outcome.success() {
            info!(
                stage = %stage_id,
                step_no,
                confidence = outcome.confidence(),
                duration_ms = outcome.duration_ms(),
                "Stage completed"
            );
            events::STAGE_COMPLETED
        } else {
            warn!(
                stage = %stage_id,
                step_no,
                rationale = outcome.rationale(),
                "Stage failed, continuing"
            );
            events::STAGE_FAILED
        };
        self.events.try_emit(
            event,
            Some(serde_json::json!({
                "trace_id": recorder.trace_id().to_string(),
                "stage": stage_id,
                "step_no": step_no,
                "success": outcome.success(),
                "confidence": outcome.confidence(),
                "duration_ms": outcome.duration_ms(),
            })),
        );

        outcome
    }

    /// Finalizes the trace and reports it.
    fn finish<'a>(
        &self,
        recorder: &mut TraceRecorder,
        status: TraceStatus,
        reason: StopReason,
    ) -> Phase<'a> {
        let final_confidence = recorder.trace().last_step().map(StepOutcome::confidence);
        if !recorder.finalize(status, reason.clone(), final_confidence) {
            return Phase::Finished(recorder.trace().status());
        }

        let trace = recorder.trace();
        let summary = trace.summary();
        let event = if status == TraceStatus::Completed {
            info!(
                stop_reason = %reason,
                steps = summary.steps,
                final_confidence = ?final_confidence,
                "Orchestration completed"
            );
            events::ORCHESTRATION_COMPLETED
        } else {
            warn!(
                stop_reason = %reason,
                steps = summary.steps,
                "Orchestration failed"
            );
            events::ORCHESTRATION_FAILED
        };
        self.events.try_emit(
            event,
            Some(serde_json::json!({
                "trace_id": trace.trace_id().to_string(),
                "status": status,
                "stop_reason": reason,
                "steps": summary.steps,
                "final_confidence": final_confidence,
                "total_duration_ms": summary.total_duration_ms,
            })),
        );
        Phase::Finished(status)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.registry.ids())
            .field("planner", &self.planner.name())
            .field("config", &self.config)
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}
