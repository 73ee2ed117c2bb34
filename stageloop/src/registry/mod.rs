//! Stage registry.
//!
//! The registry is filled once at startup and shared read-only afterwards.
//! Registration order is significant: it is the order the deterministic
//! fallback planner walks.

mod descriptor;

pub use descriptor::{Capability, StageDescriptor, StageId};

use crate::errors::RegistryError;
use crate::stages::StageWorker;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A stage descriptor paired with its worker.
#[derive(Debug, Clone)]
pub struct RegisteredStage {
    /// The stage descriptor.
    pub descriptor: StageDescriptor,
    /// The worker handle.
    pub worker: Arc<dyn StageWorker>,
}

impl RegisteredStage {
    /// Returns the stage id.
    #[must_use]
    pub fn id(&self) -> &StageId {
        &self.descriptor.id
    }
}

/// Registry of available stages.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    /// Stages in registration order.
    stages: Vec<RegisteredStage>,
    /// Position of each id in `stages`.
    index: HashMap<StageId, usize>,
}

impl StageRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateStage` if the id is already taken.
    pub fn register(
        &mut self,
        descriptor: StageDescriptor,
        worker: Arc<dyn StageWorker>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.id) {
            return Err(RegistryError::duplicate(descriptor.id.as_str()));
        }

        self.index.insert(descriptor.id.clone(), self.stages.len());
        self.stages.push(RegisteredStage { descriptor, worker });
        Ok(())
    }

    /// Registers a stage, consuming and returning the registry.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateStage` if the id is already taken.
    pub fn with_stage(
        mut self,
        descriptor: StageDescriptor,
        worker: Arc<dyn StageWorker>,
    ) -> Result<Self, RegistryError> {
        self.register(descriptor, worker)?;
        Ok(self)
    }

    /// Looks up a stage by id.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for an unknown id.
    pub fn get(&self, id: &str) -> Result<&RegisteredStage, RegistryError> {
        self.index
            .get(id)
            .map(|&pos| &self.stages[pos])
            .ok_or_else(|| RegistryError::not_found(id))
    }

    /// Returns true if a stage is registered under the id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Lists stages eligible for selection, in registration order.
    ///
    /// Stages in `executed` are left out unless their descriptor is
    /// re-entrant.
    #[must_use]
    pub fn list_available(&self, executed: &HashSet<StageId>) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|stage| stage.descriptor.reentrant || !executed.contains(stage.id()))
            .map(|stage| stage.id().clone())
            .collect()
    }

    /// Returns all descriptors in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<&StageDescriptor> {
        self.stages.iter().map(|s| &s.descriptor).collect()
    }

    /// Returns all ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id().clone()).collect()
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
