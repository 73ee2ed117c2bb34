//! Trace status, loop state and stop reason enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// The run is still in progress.
    #[default]
    Running,
    /// The run stopped through its termination policy.
    Completed,
    /// The run hit a fatal fault or was cancelled.
    Failed,
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl TraceStatus {
    /// Returns true if no further steps may be recorded.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// States of the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Asking the decision provider for the next stage.
    Planning,
    /// Running the chosen stage.
    Executing,
    /// Evaluating stop conditions after a step.
    Gating,
    /// Finished through the termination policy.
    Completed,
    /// Finished through a fatal fault.
    Failed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::Gating => write!(f, "gating"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl LoopState {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a run stopped.
///
/// Serialized as a plain string. Reasons supplied by a decision provider
/// that do not match a built-in reason are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum StopReason {
    /// A step reached the confidence threshold.
    ThresholdReached,
    /// The step budget was used up.
    MaxStepsReached,
    /// No eligible stage remained.
    Exhausted,
    /// The planner named a stage the registry does not know.
    RegistryError,
    /// The run was cancelled between stages.
    Cancelled,
    /// The decision provider ended the run without a built-in reason.
    PlannerStop,
    /// A provider-specific reason.
    Other(String),
}

impl StopReason {
    /// Returns true for reasons only the engine may record.
    ///
    /// Gate and fault reasons describe what the loop observed; a decision
    /// provider cannot claim them.
    #[must_use]
    pub fn is_engine_reserved(&self) -> bool {
        matches!(
            self,
            Self::ThresholdReached | Self::MaxStepsReached | Self::RegistryError | Self::Cancelled
        )
    }

    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ThresholdReached => "threshold_reached",
            Self::MaxStepsReached => "max_steps_reached",
            Self::Exhausted => "exhausted",
            Self::RegistryError => "registry_error",
            Self::Cancelled => "cancelled",
            Self::PlannerStop => "planner_stop",
            Self::Other(reason) => reason,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StopReason {
    fn from(value: &str) -> Self {
        match value {
            "threshold_reached" => Self::ThresholdReached,
            "max_steps_reached" => Self::MaxStepsReached,
            "exhausted" => Self::Exhausted,
            "registry_error" => Self::RegistryError,
            "cancelled" => Self::Cancelled,
            "planner_stop" | "" => Self::PlannerStop,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for StopReason {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<StopReason> for String {
    fn from(reason: StopReason) -> Self {
        reason.as_str().to_string()
    }
}
