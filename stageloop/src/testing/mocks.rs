//! Test doubles for stage workers, decision providers and completion
//! services.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::ContextSnapshot;
use crate::errors::{CompletionError, PlanningError, StageFailure};
use crate::planner::{
    fallback_decision, CompletionRequest, CompletionService, Decision, DecisionProvider,
    PlanningRequest,
};
use crate::stages::{StageInput, StageReply, StageWorker};

/// A worker that always succeeds with the same confidence.
#[derive(Debug)]
pub struct FixedStage {
    confidence: f64,
    output: serde_json::Value,
    rationale: String,
    calls: AtomicUsize,
}

impl FixedStage {
    /// Creates a worker replying `"ok"` with `confidence`.
    #[must_use]
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            output: serde_json::json!("ok"),
            rationale: "fixed reply".to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the published output.
    #[must_use]
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    /// Sets the rationale.
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Returns how many times the worker ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageWorker for FixedStage {
    async fn run(&self, _input: &StageInput) -> Result<StageReply, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StageReply::new(self.output.clone(), self.confidence).with_rationale(&self.rationale))
    }
}

/// A worker replying with a different confidence on each call.
///
/// The last confidence repeats once the sequence runs out.
#[derive(Debug)]
pub struct SequenceStage {
    confidences: Vec<f64>,
    calls: AtomicUsize,
}

impl SequenceStage {
    /// Creates a worker cycling through `confidences`.
    #[must_use]
    pub fn new(confidences: Vec<f64>) -> Self {
        Self {
            confidences,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the worker ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageWorker for SequenceStage {
    async fn run(&self, input: &StageInput) -> Result<StageReply, StageFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let confidence = self
            .confidences
            .get(call)
            .or_else(|| self.confidences.last())
            .copied()
            .unwrap_or(0.0);
        Ok(StageReply::new(
            serde_json::json!({"pass": call + 1, "step_no": input.step_no}),
            confidence,
        ))
    }
}

/// A worker that always reports a failure.
#[derive(Debug)]
pub struct FailingStage {
    detail: String,
}

impl FailingStage {
    /// Creates a worker failing with `detail`.
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl StageWorker for FailingStage {
    async fn run(&self, _input: &StageInput) -> Result<StageReply, StageFailure> {
        Err(StageFailure::worker(self.detail.clone()))
    }
}

/// A worker that panics.
#[derive(Debug)]
pub struct PanickingStage {
    message: String,
}

impl PanickingStage {
    /// Creates a worker panicking with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StageWorker for PanickingStage {
    async fn run(&self, _input: &StageInput) -> Result<StageReply, StageFailure> {
        panic!("{}", self.message);
    }
}

/// A worker that sleeps before replying.
#[derive(Debug)]
pub struct SlowStage {
    delay: Duration,
    confidence: f64,
}

impl SlowStage {
    /// Creates a worker replying with `confidence` after `delay`.
    #[must_use]
    pub fn new(delay: Duration, confidence: f64) -> Self {
        Self { delay, confidence }
    }

    /// Creates a slow worker with the delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(ms: u64, confidence: f64) -> Self {
        Self::new(Duration::from_millis(ms), confidence)
    }
}

#[async_trait]
impl StageWorker for SlowStage {
    async fn run(&self, _input: &StageInput) -> Result<StageReply, StageFailure> {
        tokio::time::sleep(self.delay).await;
        Ok(StageReply::new(serde_json::json!("slow"), self.confidence))
    }
}

/// A worker that records every input it receives.
#[derive(Debug)]
pub struct RecordingStage {
    confidence: f64,
    inputs: Mutex<Vec<StageInput>>,
}

impl RecordingStage {
    /// Creates a recording worker replying with `confidence`.
    #[must_use]
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Returns all recorded inputs.
    #[must_use]
    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().clone()
    }

    /// Returns the context snapshots seen, one per call.
    #[must_use]
    pub fn contexts(&self) -> Vec<ContextSnapshot> {
        self.inputs.lock().iter().map(|i| i.context.clone()).collect()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }
}

#[async_trait]
impl StageWorker for RecordingStage {
    async fn run(&self, input: &StageInput) -> Result<StageReply, StageFailure> {
        self.inputs.lock().push(input.clone());
        Ok(StageReply::new(
            serde_json::json!({"seen_keys": input.context.keys()}),
            self.confidence,
        ))
    }
}

/// A decision provider replaying a fixed script.
///
/// Each call pops the next scripted result. Once the script is used up it
/// answers with the fallback choice. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<Result<Decision, PlanningError>>>,
    requests: Mutex<Vec<PlanningRequest>>,
    delay: Option<Duration>,
}

impl ScriptedPlanner {
    /// Creates a planner with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a decision.
    #[must_use]
    pub fn then(self, decision: Decision) -> Self {
        self.script.lock().push_back(Ok(decision));
        self
    }

    /// Appends a planning error.
    #[must_use]
    pub fn then_error(self, error: PlanningError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Delays every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<PlanningRequest> {
        self.requests.lock().clone()
    }

    /// Returns how many times the planner was consulted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedPlanner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn plan(&self, request: &PlanningRequest) -> Result<Decision, PlanningError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(fallback_decision(&request.candidates)))
    }
}

/// A decision provider that panics on every call.
#[derive(Debug, Default)]
pub struct PanickingPlanner {
    calls: AtomicUsize,
}

impl PanickingPlanner {
    /// Creates the planner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times the planner was consulted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionProvider for PanickingPlanner {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn plan(&self, _request: &PlanningRequest) -> Result<Decision, PlanningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("decision provider bug");
    }
}

/// A completion service replaying canned replies.
#[derive(Debug, Default)]
pub struct ScriptedCompletionService {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionService {
    /// Creates a service with no replies queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw reply.
    #[must_use]
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.replies.lock().push_back(Ok(text.into()));
        self
    }

    /// Queues a service error.
    #[must_use]
    pub fn fail(self, error: CompletionError) -> Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    /// Returns the recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.requests.lock().push(request.clone());
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| Err(CompletionError::Unavailable("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageId;
    use crate::trace::TraceId;

    fn input() -> StageInput {
        StageInput::new(StageId::new("s").unwrap(), 1, "goal", ContextSnapshot::default())
    }

    fn request(candidates: &[&str]) -> PlanningRequest {
        PlanningRequest {
            trace_id: TraceId::new(),
            goal: "goal".to_string(),
            context: ContextSnapshot::default(),
            history: Vec::new(),
            candidates: candidates.iter().map(|c| StageId::new(*c).unwrap()).collect(),
            descriptors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fixed_stage_counts_calls() {
        let stage = FixedStage::new(0.4).with_output(serde_json::json!(1));
        let reply = stage.run(&input()).await.unwrap();
        stage.run(&input()).await.unwrap();

        assert_eq!(reply.output, serde_json::json!(1));
        assert_eq!(stage.calls(), 2);
    }

    #[tokio::test]
    async fn test_sequence_stage_repeats_last() {
        let stage = SequenceStage::new(vec![0.2, 0.6]);
        let confidences: Vec<f64> = [
            stage.run(&input()).await.unwrap().confidence,
            stage.run(&input()).await.unwrap().confidence,
            stage.run(&input()).await.unwrap().confidence,
        ]
        .to_vec();

        assert_eq!(confidences, vec![0.2, 0.6, 0.6]);
        assert_eq!(stage.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let err = FailingStage::new("bad scan").run(&input()).await.unwrap_err();
        assert_eq!(err.detail, "bad scan");
    }

    #[tokio::test]
    async fn test_slow_stage() {
        let start = std::time::Instant::now();
        let reply = SlowStage::with_delay_ms(10, 0.5).run(&input()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(reply.output, serde_json::json!("slow"));
    }

    #[tokio::test]
    async fn test_recording_stage() {
        let stage = RecordingStage::new(0.1);
        stage.run(&input()).await.unwrap();

        assert_eq!(stage.call_count(), 1);
        assert_eq!(stage.inputs()[0].goal, "goal");
        assert!(stage.contexts()[0].is_empty());
    }

    #[tokio::test]
    async fn test_scripted_planner_then_fallback() {
        let planner = ScriptedPlanner::new()
            .then(Decision::run(StageId::new("b").unwrap(), "scripted"))
            .then_error(PlanningError::unparseable("junk"));

        let first = planner.plan(&request(&["a", "b"])).await.unwrap();
        assert_eq!(first.next_stage.unwrap().as_str(), "b");

        assert!(planner.plan(&request(&["a"])).await.is_err());

        let third = planner.plan(&request(&["a"])).await.unwrap();
        assert_eq!(third.next_stage.unwrap().as_str(), "a");
        assert_eq!(planner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_completion_service() {
        let service = ScriptedCompletionService::new()
            .reply("{}")
            .fail(CompletionError::EmptyReply);
        let completion = CompletionRequest::for_planning(&request(&["a"]));

        assert_eq!(service.complete(&completion).await.unwrap(), "{}");
        assert_eq!(
            service.complete(&completion).await.unwrap_err(),
            CompletionError::EmptyReply
        );
        assert!(service.complete(&completion).await.is_err());
        assert_eq!(service.requests().len(), 3);
    }
}
