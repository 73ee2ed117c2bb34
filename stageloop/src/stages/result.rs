//! Stage worker input and reply types.

use crate::context::ContextSnapshot;
use crate::registry::StageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything a stage worker is given for one invocation.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// The stage being run.
    pub stage_id: StageId,
    /// The step number this invocation will be recorded under.
    pub step_no: usize,
    /// The run's goal.
    pub goal: String,
    /// Shared context as of the start of this step.
    pub context: ContextSnapshot,
}

impl StageInput {
    /// Creates a new stage input.
    #[must_use]
    pub fn new(
        stage_id: StageId,
        step_no: usize,
        goal: impl Into<String>,
        context: ContextSnapshot,
    ) -> Self {
        Self {
            stage_id,
            step_no,
            goal: goal.into(),
            context,
        }
    }

    /// Reads a context value.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }
}

/// A successful reply from a stage worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReply {
    /// The published output, merged into the context as `<stage>_result`.
    pub output: serde_json::Value,
    /// Why the worker produced this output.
    #[serde(default)]
    pub rationale: String,
    /// Self-reported confidence, expected within [0, 1].
    pub confidence: f64,
    /// Additional worker metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageReply {
    /// Creates a reply with an output and confidence.
    #[must_use]
    pub fn new(output: serde_json::Value, confidence: f64) -> Self {
        Self {
            output,
            rationale: String::new(),
            confidence,
            metadata: HashMap::new(),
        }
    }

    /// Sets the rationale.
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
