//! Stage executor.
//!
//! Runs one worker with a time budget and normalizes whatever happens into
//! a [`StepOutcome`]. Timeouts, worker errors and panics become
//! zero-confidence failed steps; nothing escapes to the caller.

use crate::context::ContextSnapshot;
use crate::core::StepOutcome;
use crate::errors::StageFailure;
use crate::registry::RegisteredStage;
use crate::stages::StageInput;
use crate::utils::{elapsed_ms, panic_message};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Invokes stage workers.
#[derive(Debug, Clone, Copy)]
pub struct StageExecutor {
    timeout: Duration,
}

impl StageExecutor {
    /// Creates an executor with a per-invocation timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the per-invocation timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs a stage and returns its outcome.
    pub async fn execute(
        &self,
        stage: &RegisteredStage,
        step_no: usize,
        goal: &str,
        context: ContextSnapshot,
    ) -> StepOutcome {
        let stage_id = stage.id().clone();
        let input = StageInput::new(stage_id.clone(), step_no, goal, context);

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(stage.worker.run(&input)).catch_unwind(),
        )
        .await;
        let duration_ms = elapsed_ms(start);

        let failure = match result {
            Ok(Ok(Ok(reply))) => {
                let outcome = StepOutcome::succeeded(step_no, stage_id, reply, duration_ms);
                debug!(
                    stage = %outcome.stage_id(),
                    step_no,
                    confidence = outcome.confidence(),
                    duration_ms,
                    "Stage completed"
                );
                return outcome;
            }
            Ok(Ok(Err(failure))) => failure,
            Ok(Err(payload)) => StageFailure::panic(panic_message(payload.as_ref())),
            Err(_) => StageFailure::timeout(duration_as_ms(self.timeout)),
        };

        warn!(
            stage = %stage_id,
            step_no,
            kind = %failure.kind,
            detail = %failure.detail,
            duration_ms,
            "Stage failed"
        );
        StepOutcome::failed(step_no, stage_id, &failure, duration_ms)
    }
}

fn duration_as_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
