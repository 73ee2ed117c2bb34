//! Run-scoped context store and its immutable snapshots.

use crate::core::StepOutcome;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable view of the context at one point in a run.
///
/// Cloning is cheap; the underlying map is shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    data: Arc<HashMap<String, serde_json::Value>>,
}

impl ContextSnapshot {
    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.data.as_ref().clone()
    }
}

impl Serialize for ContextSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.as_ref().serialize(serializer)
    }
}

/// Mutable key/value state shared by the planner and the stages of one run.
///
/// Only the orchestration loop writes to the store. Readers get a
/// [`ContextSnapshot`]; writes after a snapshot was taken copy the map, so
/// snapshots never change underneath their holders.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    data: Arc<HashMap<String, serde_json::Value>>,
}

impl ContextStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with caller-supplied data.
    #[must_use]
    pub fn from_data(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Gets a value from the store.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Sets a value, returning the previous one.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        Arc::make_mut(&mut self.data).insert(key.into(), value)
    }

    /// Merges a step outcome into the store.
    ///
    /// A successful step publishes `<stage>_result` and `<stage>_confidence`.
    /// A failed step publishes `<stage>_error` and leaves earlier results of
    /// the same stage untouched.
    pub fn merge_outcome(&mut self, outcome: &StepOutcome) {
        let stage = outcome.stage_id();

        if outcome.success() {
            let data = Arc::make_mut(&mut self.data);
            data.insert(
                stage.result_key(),
                outcome.output().cloned().unwrap_or(serde_json::Value::Null),
            );
            data.insert(stage.confidence_key(), serde_json::json!(outcome.confidence()));
            data.remove(&stage.error_key());
        } else {
            self.set(stage.error_key(), serde_json::json!(outcome.rationale()));
        }
    }

    /// Takes an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            data: Arc::clone(&self.data),
        }
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.data.as_ref().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}
