//! Error types for the stageloop orchestration engine.
//!
//! The taxonomy separates recoverable failures (stage execution, planning)
//! from failures that end a single run (registry faults) and configuration
//! mistakes caught at construction time. Invariant violations are not
//! represented here: they panic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for stageloop operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A registry fault.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A decision provider fault.
    #[error("{0}")]
    Planning(#[from] PlanningError),

    /// A completion service fault.
    #[error("{0}")]
    Completion(#[from] CompletionError),

    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A spawned run could not be joined.
    #[error("Run task failed: {0}")]
    Join(String),
}

/// Errors raised by the stage registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A stage with the same id was already registered.
    #[error("Stage already registered: {id}")]
    DuplicateStage {
        /// The conflicting stage id.
        id: String,
    },

    /// No stage is registered under the id.
    #[error("Stage not found: {id}")]
    NotFound {
        /// The missing stage id.
        id: String,
    },

    /// The id is not a valid stage identifier.
    #[error("Invalid stage id '{id}': {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl RegistryError {
    /// Creates a duplicate stage error.
    #[must_use]
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::DuplicateStage { id: id.into() }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an invalid id error.
    #[must_use]
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        match self {
            Self::DuplicateStage { id } => {
                map.insert("type".to_string(), serde_json::json!("DuplicateStage"));
                map.insert("id".to_string(), serde_json::json!(id));
            }
            Self::NotFound { id } => {
                map.insert("type".to_string(), serde_json::json!("StageNotFound"));
                map.insert("id".to_string(), serde_json::json!(id));
            }
            Self::InvalidId { id, reason } => {
                map.insert("type".to_string(), serde_json::json!("InvalidStageId"));
                map.insert("id".to_string(), serde_json::json!(id));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised by the external completion service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// The service could not be reached or refused the request.
    #[error("Completion service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with an empty body.
    #[error("Completion service returned an empty reply")]
    EmptyReply,
}

/// Errors raised while choosing the next stage.
///
/// Every variant is recoverable: the main loop answers them with the
/// deterministic fallback choice.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanningError {
    /// The completion service failed.
    #[error("Planner completion failed: {0}")]
    Completion(#[from] CompletionError),

    /// The provider did not answer in time.
    #[error("Planner timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The reply was not parseable JSON.
    #[error("Planner reply is not valid JSON: {detail}")]
    Unparseable {
        /// Parser diagnostic.
        detail: String,
    },

    /// The reply parsed but had the wrong shape.
    #[error("Planner reply has an invalid shape: {detail}")]
    InvalidShape {
        /// What was wrong.
        detail: String,
    },

    /// The provider panicked while planning.
    #[error("Planner panicked: {detail}")]
    Panicked {
        /// Panic message.
        detail: String,
    },

    /// The provider chose a stage that is registered but not eligible.
    #[error("Planner chose ineligible stage '{id}'")]
    IneligibleStage {
        /// The proposed stage id.
        id: String,
    },
}

impl PlanningError {
    /// Creates an unparseable reply error.
    #[must_use]
    pub fn unparseable(detail: impl Into<String>) -> Self {
        Self::Unparseable {
            detail: detail.into(),
        }
    }

    /// Creates an invalid shape error.
    #[must_use]
    pub fn invalid_shape(detail: impl Into<String>) -> Self {
        Self::InvalidShape {
            detail: detail.into(),
        }
    }

    /// Short machine-readable kind, used in step metadata.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completion(_) => "completion",
            Self::Timeout { .. } => "timeout",
            Self::Unparseable { .. } => "unparseable",
            Self::InvalidShape { .. } => "invalid_shape",
            Self::Panicked { .. } => "panic",
            Self::IneligibleStage { .. } => "ineligible_stage",
        }
    }
}

/// Category of a stage execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailureKind {
    /// The worker reported an error.
    Worker,
    /// The worker exceeded its time budget.
    Timeout,
    /// The worker panicked.
    Panic,
}

impl fmt::Display for StageFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Timeout => write!(f, "timeout"),
            Self::Panic => write!(f, "panic"),
        }
    }
}

/// Error returned by a stage worker, or synthesized by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct StageFailure {
    /// The failure category.
    pub kind: StageFailureKind,
    /// Human-readable diagnostic.
    pub detail: String,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(kind: StageFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Creates a worker-reported failure.
    #[must_use]
    pub fn worker(detail: impl Into<String>) -> Self {
        Self::new(StageFailureKind::Worker, detail)
    }

    /// Creates a timeout failure.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            StageFailureKind::Timeout,
            format!("stage timed out after {timeout_ms}ms"),
        )
    }

    /// Creates a panic failure.
    #[must_use]
    pub fn panic(detail: impl Into<String>) -> Self {
        Self::new(StageFailureKind::Panic, detail)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind));
        map.insert("detail".to_string(), serde_json::json!(self.detail));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<anyhow::Error> for StageFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::worker(format!("{err:#}"))
    }
}

/// Errors raised when a configuration is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// `max_steps` must allow at least one step.
    #[error("max_steps must be at least 1")]
    InvalidMaxSteps,

    /// The confidence threshold is outside [0, 1].
    #[error("confidence_threshold must be within [0.0, 1.0], got {0}")]
    InvalidThreshold(f64),

    /// A timeout is zero.
    #[error("{field} must be greater than zero")]
    InvalidTimeout {
        /// The offending field.
        field: &'static str,
    },

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// An environment variable held an unusable value.
    #[error("Invalid value '{value}' for environment variable {var}")]
    Env {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
    },
}
