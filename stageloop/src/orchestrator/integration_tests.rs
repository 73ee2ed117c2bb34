//! End-to-end runs through the orchestration loop.

use super::*;
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::core::{StopReason, TraceStatus};
use crate::errors::PlanningError;
use crate::events::{self, CollectingEventSink};
use crate::planner::{CompletionPlanner, Decision};
use crate::registry::{StageId, StageRegistry};
use crate::testing::{
    assert_confidence_bounds, assert_loop_free, assert_stage_sequence, assert_steps_ordered,
    assert_stopped_with, fixed_registry, FailingStage, FixedStage, PanickingPlanner,
    PanickingStage, RecordingStage, ScriptedCompletionService, ScriptedPlanner, SequenceStage,
    SlowStage, TestRegistry,
};
use crate::trace::Trace;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn id(raw: &str) -> StageId {
    StageId::new(raw).unwrap()
}

fn orchestrator(registry: StageRegistry) -> Orchestrator {
    OrchestratorBuilder::new()
        .with_registry(registry)
        .build()
        .unwrap()
}

fn check_invariants(trace: &Trace) {
    assert!(trace.status().is_terminal());
    assert_steps_ordered(trace);
    assert_confidence_bounds(trace);
}

#[tokio::test]
async fn test_stops_when_threshold_reached() {
    let orchestrator = orchestrator(fixed_registry(&[("classify", 0.85), ("extract", 0.5)]));

    let trace = orchestrator.run("analyze contract", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    assert_stage_sequence(&trace, &["classify"]);
    assert_eq!(trace.final_confidence(), Some(0.85));
}

#[tokio::test]
async fn test_stops_at_max_steps() {
    let registry = fixed_registry(&[("a", 0.3), ("b", 0.3), ("c", 0.3), ("d", 0.3), ("e", 0.3)]);
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(registry)
        .with_config(OrchestratorConfig::new().with_max_steps(3))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::MaxStepsReached);
    assert_stage_sequence(&trace, &["a", "b", "c"]);
    assert_eq!(trace.final_confidence(), Some(0.3));
}

#[tokio::test]
async fn test_exhausts_registry() {
    let orchestrator = orchestrator(fixed_registry(&[("a", 0.3), ("b", 0.4)]));

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::Exhausted);
    assert_stage_sequence(&trace, &["a", "b"]);
    assert_loop_free(&trace, &[]);
    assert_eq!(trace.final_confidence(), Some(0.4));
}

#[tokio::test]
async fn test_empty_registry_never_consults_planner() {
    let planner = Arc::new(ScriptedPlanner::new());
    let orchestrator = OrchestratorBuilder::new()
        .with_planner(planner.clone())
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::Exhausted);
    assert!(trace.is_empty());
    assert_eq!(trace.final_confidence(), None);
    assert_eq!(planner.call_count(), 0);
}

#[tokio::test]
async fn test_failed_stage_does_not_end_run() {
    let recorder = Arc::new(RecordingStage::new(0.9));
    let registry = TestRegistry::new()
        .stage("ocr", Arc::new(FailingStage::new("scan unreadable")))
        .unwrap()
        .stage("classify", recorder.clone())
        .unwrap()
        .build();

    let trace = orchestrator(registry).run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    assert_stage_sequence(&trace, &["ocr", "classify"]);

    let failed = &trace.steps()[0];
    assert!(!failed.success());
    assert_eq!(failed.confidence(), 0.0);
    assert!(failed.rationale().contains("scan unreadable"));
    assert_eq!(failed.metadata()["error_kind"], serde_json::json!("worker"));

    let seen = &recorder.contexts()[0];
    assert!(seen.contains_key("ocr_error"));
    assert!(!seen.contains_key("ocr_result"));
}

#[tokio::test]
async fn test_panic_and_timeout_are_contained() {
    let registry = TestRegistry::new()
        .stage("boom", Arc::new(PanickingStage::new("worker exploded")))
        .unwrap()
        .stage("slow", Arc::new(SlowStage::with_delay_ms(500, 0.99)))
        .unwrap()
        .fixed("finish", 0.9)
        .unwrap()
        .build();
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(registry)
        .with_config(OrchestratorConfig::new().with_stage_timeout_ms(20))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    assert_stage_sequence(&trace, &["boom", "slow", "finish"]);
    assert_eq!(trace.steps()[0].metadata()["error_kind"], serde_json::json!("panic"));
    assert_eq!(trace.steps()[1].metadata()["error_kind"], serde_json::json!("timeout"));
    assert!(trace.steps()[1].duration_ms() < 500.0);
}

#[tokio::test]
async fn test_context_propagates_between_stages() {
    let recorder = Arc::new(RecordingStage::new(0.9));
    let registry = TestRegistry::new()
        .stage(
            "classify",
            Arc::new(FixedStage::new(0.5).with_output(serde_json::json!({"doc_type": "nda"}))),
        )
        .unwrap()
        .stage("extract", recorder.clone())
        .unwrap()
        .build();
    let planner = Arc::new(ScriptedPlanner::new());
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(registry)
        .with_planner(planner.clone())
        .build()
        .unwrap();

    let mut initial = InitialContext::new();
    initial.insert("document".to_string(), serde_json::json!("Mutual NDA..."));
    let trace = orchestrator.run("analyze", initial).await;

    check_invariants(&trace);
    assert_stage_sequence(&trace, &["classify", "extract"]);

    let inputs = recorder.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].step_no, 2);
    assert_eq!(inputs[0].goal, "analyze");
    assert_eq!(
        inputs[0].context.get("classify_result"),
        Some(&serde_json::json!({"doc_type": "nda"}))
    );
    assert_eq!(
        inputs[0].context.get("classify_confidence"),
        Some(&serde_json::json!(0.5))
    );
    assert_eq!(
        inputs[0].context.get("document"),
        Some(&serde_json::json!("Mutual NDA..."))
    );

    let requests = planner.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].candidates, vec![id("classify"), id("extract")]);
    assert_eq!(requests[1].history.len(), 1);
    assert_eq!(requests[1].candidates, vec![id("extract")]);
    assert!(requests[1].context.contains_key("classify_result"));
}

#[tokio::test]
async fn test_unregistered_stage_fails_run() {
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("classify", 0.5)]))
        .with_planner(Arc::new(
            ScriptedPlanner::new().then(Decision::run(id("ghost"), "hallucinated")),
        ))
        .with_event_sink(sink.clone())
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    assert_stopped_with(&trace, TraceStatus::Failed, &StopReason::RegistryError);
    assert!(trace.is_empty());
    assert_eq!(
        sink.event_types().last().map(String::as_str),
        Some(events::ORCHESTRATION_FAILED)
    );
}

#[tokio::test]
async fn test_ineligible_stage_uses_fallback() {
    let planner = ScriptedPlanner::new()
        .then(Decision::run(id("a"), "start with a"))
        .then(Decision::run(id("a"), "again"));
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("a", 0.3), ("b", 0.3)]))
        .with_planner(Arc::new(planner))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::Exhausted);
    assert_stage_sequence(&trace, &["a", "b"]);
    assert_loop_free(&trace, &[]);

    let first = trace.steps()[0].metadata();
    assert_eq!(first["planner"], serde_json::json!("scripted"));
    assert_eq!(first["decision_rationale"], serde_json::json!("start with a"));

    let second = trace.steps()[1].metadata();
    assert_eq!(second["planner"], serde_json::json!("fallback"));
    assert_eq!(second["planning_error_kind"], serde_json::json!("ineligible_stage"));
}

#[tokio::test]
async fn test_planner_errors_fall_back() {
    let sink = Arc::new(CollectingEventSink::new());
    let planner = ScriptedPlanner::new().then_error(PlanningError::unparseable("not json"));
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("a", 0.9), ("b", 0.9)]))
        .with_planner(Arc::new(planner))
        .with_event_sink(sink.clone())
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    assert_stage_sequence(&trace, &["a"]);
    assert_eq!(
        trace.steps()[0].metadata()["planning_error_kind"],
        serde_json::json!("unparseable")
    );
    assert_eq!(
        sink.event_types(),
        vec![
            events::ORCHESTRATION_STARTED,
            events::PLANNER_FALLBACK,
            events::STAGE_STARTED,
            events::STAGE_COMPLETED,
            events::ORCHESTRATION_COMPLETED,
        ]
    );
}

#[tokio::test]
async fn test_planner_timeout_falls_back() {
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("a", 0.9)]))
        .with_planner(Arc::new(
            ScriptedPlanner::new()
                .then(Decision::run(id("a"), "slow answer"))
                .with_delay(Duration::from_millis(500)),
        ))
        .with_config(OrchestratorConfig::new().with_planner_timeout_ms(20))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    let metadata = trace.steps()[0].metadata();
    assert_eq!(metadata["planner"], serde_json::json!("fallback"));
    assert_eq!(metadata["planning_error_kind"], serde_json::json!("timeout"));
}

#[tokio::test]
async fn test_panicking_planner_falls_back() {
    let planner = Arc::new(PanickingPlanner::new());
    let orchestrator = Arc::new(
        OrchestratorBuilder::new()
            .with_registry(fixed_registry(&[("a", 0.9), ("b", 0.9)]))
            .with_planner(planner.clone())
            .build()
            .unwrap(),
    );

    let handle = orchestrator.start("goal", InitialContext::new());
    let trace_id = handle.trace_id();
    let trace = handle.join().await.unwrap();

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    assert_stage_sequence(&trace, &["a"]);
    assert_eq!(planner.call_count(), 1);
    let metadata = trace.steps()[0].metadata();
    assert_eq!(metadata["planner"], serde_json::json!("fallback"));
    assert_eq!(metadata["planning_error_kind"], serde_json::json!("panic"));

    let status = orchestrator.status(trace_id).unwrap();
    assert_eq!(status.status, TraceStatus::Completed);
    assert!(orchestrator.active_runs().is_empty());
}

#[tokio::test]
async fn test_planner_cannot_claim_engine_stop_reason() {
    let planner = ScriptedPlanner::new()
        .then(Decision::run(id("a"), "first"))
        .then(Decision::stop(StopReason::Cancelled, "pretend cancellation"));
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("a", 0.3), ("b", 0.3)]))
        .with_planner(Arc::new(planner))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::PlannerStop);
    assert_stage_sequence(&trace, &["a"]);
}

#[tokio::test]
async fn test_planner_can_stop_the_run() {
    let planner = ScriptedPlanner::new()
        .then(Decision::run(id("a"), "first").with_expected_confidence(0.4))
        .then(Decision::stop(
            StopReason::Other("goal_satisfied".to_string()),
            "nothing left to learn",
        ));
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("a", 0.3), ("b", 0.3)]))
        .with_planner(Arc::new(planner))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    assert_stopped_with(
        &trace,
        TraceStatus::Completed,
        &StopReason::Other("goal_satisfied".to_string()),
    );
    assert_stage_sequence(&trace, &["a"]);
    assert_eq!(
        trace.steps()[0].metadata()["expected_confidence"],
        serde_json::json!(0.4)
    );
    assert_eq!(trace.final_confidence(), Some(0.3));
}

#[tokio::test]
async fn test_reentrant_stage_repeats_until_threshold() {
    let worker = Arc::new(SequenceStage::new(vec![0.3, 0.5, 0.9]));
    let registry = TestRegistry::new()
        .reentrant("refine", worker.clone())
        .unwrap()
        .build();

    let trace = orchestrator(registry).run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    assert_stage_sequence(&trace, &["refine", "refine", "refine"]);
    assert_loop_free(&trace, &["refine"]);
    assert_eq!(worker.calls(), 3);
}

#[tokio::test]
async fn test_out_of_range_confidence_is_clamped() {
    let trace = orchestrator(fixed_registry(&[("a", 1.5)]))
        .run("goal", InitialContext::new())
        .await;

    check_invariants(&trace);
    assert_eq!(trace.steps()[0].confidence(), 1.0);
    assert!(trace.steps()[0]
        .metadata()
        .contains_key("confidence_clamped_from"));
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::ThresholdReached);
}

#[tokio::test]
async fn test_event_order_for_failed_stage() {
    let sink = Arc::new(CollectingEventSink::new());
    let registry = TestRegistry::new()
        .stage("broken", Arc::new(FailingStage::new("nope")))
        .unwrap()
        .build();
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(registry)
        .with_event_sink(sink.clone())
        .build()
        .unwrap();

    orchestrator.run("goal", InitialContext::new()).await;

    assert_eq!(
        sink.event_types(),
        vec![
            events::ORCHESTRATION_STARTED,
            events::STAGE_STARTED,
            events::STAGE_FAILED,
            events::ORCHESTRATION_COMPLETED,
        ]
    );
    let (_, payload) = &sink.events_of_type(events::ORCHESTRATION_COMPLETED)[0];
    let payload = payload.as_ref().unwrap();
    assert_eq!(payload["stop_reason"], serde_json::json!("exhausted"));
    assert_eq!(payload["final_confidence"], serde_json::json!(0.0));
}

#[tokio::test]
async fn test_completion_planner_end_to_end() {
    let service = Arc::new(
        ScriptedCompletionService::new()
            .reply(r#"{"next_stage": "b", "rationale": "risk first", "expected_confidence": 0.7}"#)
            .reply("I am not sure what to do."),
    );
    let orchestrator = OrchestratorBuilder::new()
        .with_registry(fixed_registry(&[("a", 0.3), ("b", 0.3)]))
        .with_planner(Arc::new(CompletionPlanner::new(service.clone())))
        .build()
        .unwrap();

    let trace = orchestrator.run("goal", InitialContext::new()).await;

    check_invariants(&trace);
    assert_stopped_with(&trace, TraceStatus::Completed, &StopReason::Exhausted);
    assert_stage_sequence(&trace, &["b", "a"]);

    let first = trace.steps()[0].metadata();
    assert_eq!(first["planner"], serde_json::json!("completion"));
    assert_eq!(first["decision_rationale"], serde_json::json!("risk first"));
    assert_eq!(first["expected_confidence"], serde_json::json!(0.7));

    let second = trace.steps()[1].metadata();
    assert_eq!(second["planner"], serde_json::json!("fallback"));
    assert_eq!(second["planning_error_kind"], serde_json::json!("unparseable"));

    assert_eq!(service.requests().len(), 2);
}

#[tokio::test]
async fn test_cancelled_before_first_stage() {
    let token = CancellationToken::new();
    token.cancel("user aborted");
    let orchestrator = orchestrator(fixed_registry(&[("a", 0.9)]));

    let trace = orchestrator
        .run_with_cancel("goal", InitialContext::new(), &token)
        .await;

    assert_stopped_with(&trace, TraceStatus::Failed, &StopReason::Cancelled);
    assert!(trace.is_empty());
}

#[tokio::test]
async fn test_cancel_started_run_between_stages() {
    let registry = TestRegistry::new()
        .stage("first", Arc::new(SlowStage::with_delay_ms(100, 0.3)))
        .unwrap()
        .fixed("second", 0.9)
        .unwrap()
        .build();
    let orchestrator = Arc::new(orchestrator(registry));

    let handle = orchestrator.start("goal", InitialContext::new());
    while handle.status().current_stage.is_none() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(orchestrator.cancel(handle.trace_id(), "shutdown"));
    assert!(!handle.cancel("again"));

    let trace = handle.join().await.unwrap();

    assert_stopped_with(&trace, TraceStatus::Failed, &StopReason::Cancelled);
    assert_stage_sequence(&trace, &["first"]);
    assert_eq!(trace.final_confidence(), Some(0.3));
}

#[tokio::test]
async fn test_started_run_stays_queryable() {
    let orchestrator = Arc::new(orchestrator(fixed_registry(&[("a", 0.3), ("b", 0.3)])));

    let handle = orchestrator.start("goal", InitialContext::new());
    let trace_id = handle.trace_id();
    let trace = handle.join().await.unwrap();

    let status = orchestrator.status(trace_id).unwrap();
    assert_eq!(status.status, TraceStatus::Completed);
    assert_eq!(status.completed_stage_ids, vec![id("a"), id("b")]);
    assert_eq!(status.progress_percentage, 100.0);
    assert_eq!(status.steps_taken, 2);
    assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(status.current_stage, Some(id("b")));

    assert_eq!(*orchestrator.trace(trace_id).unwrap(), trace);
    assert!(orchestrator.active_runs().is_empty());

    assert!(orchestrator.forget(trace_id));
    assert!(!orchestrator.forget(trace_id));
    assert!(orchestrator.status(trace_id).is_none());
    assert!(!orchestrator.cancel(trace_id, "gone"));
}

#[tokio::test]
async fn test_finished_runs_beyond_cap_are_evicted() {
    let orchestrator = Arc::new(
        OrchestratorBuilder::new()
            .with_registry(fixed_registry(&[("a", 0.9)]))
            .with_config(OrchestratorConfig::new().with_max_retained_runs(1))
            .build()
            .unwrap(),
    );

    let first = orchestrator.start("first", InitialContext::new());
    let first_id = first.trace_id();
    first.join().await.unwrap();

    let second = orchestrator.start("second", InitialContext::new());
    let second_id = second.trace_id();
    second.join().await.unwrap();
    assert!(orchestrator.status(first_id).is_some());

    let third = orchestrator.start("third", InitialContext::new());
    let third_id = third.trace_id();
    third.join().await.unwrap();

    assert!(orchestrator.status(first_id).is_none());
    assert!(orchestrator.trace(first_id).is_none());
    assert!(orchestrator.status(second_id).is_some());
    assert!(orchestrator.status(third_id).is_some());
}

#[tokio::test]
async fn test_status_progress_is_monotonic() {
    let registry = TestRegistry::new()
        .stage("a", Arc::new(SlowStage::with_delay_ms(20, 0.3)))
        .unwrap()
        .stage("b", Arc::new(FailingStage::new("bad")))
        .unwrap()
        .stage("c", Arc::new(SlowStage::with_delay_ms(20, 0.3)))
        .unwrap()
        .build();
    let orchestrator = Arc::new(orchestrator(registry));

    let handle = orchestrator.start("goal", InitialContext::new());
    let poller = handle.status_handle();
    let mut samples = vec![poller.snapshot()];
    while !poller.is_finished() {
        tokio::time::sleep(Duration::from_millis(2)).await;
        samples.push(poller.snapshot());
    }
    handle.join().await.unwrap();
    samples.push(poller.snapshot());

    for pair in samples.windows(2) {
        assert!(pair[0].progress_percentage <= pair[1].progress_percentage);
        assert!(pair[0].steps_taken <= pair[1].steps_taken);
    }

    let last = samples.last().unwrap();
    assert_eq!(last.failed_stage_ids, vec![id("b")]);
    assert_eq!(last.completed_stage_ids, vec![id("a"), id("c")]);
    assert!((last.progress_percentage - 200.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let orchestrator = Arc::new(orchestrator(fixed_registry(&[("a", 0.3), ("b", 0.9)])));

    let first = orchestrator.start("first goal", InitialContext::new());
    let second = orchestrator.start("second goal", InitialContext::new());
    assert_ne!(first.trace_id(), second.trace_id());

    let (first, second) = (first.join().await.unwrap(), second.join().await.unwrap());

    for trace in [&first, &second] {
        check_invariants(trace);
        assert_stage_sequence(trace, &["a", "b"]);
        assert_stopped_with(trace, TraceStatus::Completed, &StopReason::ThresholdReached);
    }
    assert_eq!(first.goal(), "first goal");
    assert_eq!(second.goal(), "second goal");
}
