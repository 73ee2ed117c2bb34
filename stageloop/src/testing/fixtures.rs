//! Registry fixtures for orchestration tests.

use std::sync::Arc;

use crate::errors::RegistryError;
use crate::registry::{Capability, StageDescriptor, StageRegistry};
use crate::stages::StageWorker;

use super::FixedStage;

/// Builds a registry incrementally from raw ids.
#[derive(Debug, Default)]
pub struct TestRegistry {
    registry: StageRegistry,
}

impl TestRegistry {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a non-reentrant stage with a custom capability.
    ///
    /// # Errors
    ///
    /// Returns the registration error for an invalid or duplicate id.
    pub fn stage(self, id: &str, worker: Arc<dyn StageWorker>) -> Result<Self, RegistryError> {
        self.add(StageDescriptor::parse(id, Capability::Custom)?, worker)
    }

    /// Adds a re-entrant stage.
    ///
    /// # Errors
    ///
    /// Returns the registration error for an invalid or duplicate id.
    pub fn reentrant(
        self,
        id: &str,
        worker: Arc<dyn StageWorker>,
    ) -> Result<Self, RegistryError> {
        self.add(StageDescriptor::parse(id, Capability::Custom)?.reentrant(), worker)
    }

    /// Adds a stage answering with a fixed confidence.
    ///
    /// # Errors
    ///
    /// Returns the registration error for an invalid or duplicate id.
    pub fn fixed(self, id: &str, confidence: f64) -> Result<Self, RegistryError> {
        self.stage(id, Arc::new(FixedStage::new(confidence)))
    }

    /// Adds a stage from a full descriptor.
    ///
    /// # Errors
    ///
    /// Returns the registration error for a duplicate id.
    pub fn add(
        mut self,
        descriptor: StageDescriptor,
        worker: Arc<dyn StageWorker>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(descriptor, worker)?;
        Ok(self)
    }

    /// Returns the registry.
    #[must_use]
    pub fn build(self) -> StageRegistry {
        self.registry
    }
}

/// A registry of fixed-confidence stages, in the given order.
///
/// # Panics
///
/// Panics on an invalid or duplicate id.
#[must_use]
pub fn fixed_registry(stages: &[(&str, f64)]) -> StageRegistry {
    let mut fixture = TestRegistry::new();
    for (id, confidence) in stages {
        fixture = match fixture.fixed(id, *confidence) {
            Ok(next) => next,
            Err(e) => panic!("invalid test registry: {e}"),
        };
    }
    fixture.build()
}
