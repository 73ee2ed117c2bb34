//! Orchestrator builder with validation.

use super::Orchestrator;
use crate::config::OrchestratorConfig;
use crate::errors::{OrchestratorError, RegistryError};
use crate::events::{EventSink, NoOpEventSink};
use crate::planner::{DecisionProvider, FallbackPlanner};
use crate::registry::{StageDescriptor, StageRegistry};
use crate::stages::StageWorker;
use std::sync::Arc;

/// Builder for creating validated orchestrators.
pub struct OrchestratorBuilder {
    registry: StageRegistry,
    planner: Option<Arc<dyn DecisionProvider>>,
    config: OrchestratorConfig,
    events: Option<Arc<dyn EventSink>>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    /// Creates a builder with an empty registry and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: StageRegistry::new(),
            planner: None,
            config: OrchestratorConfig::default(),
            events: None,
        }
    }

    /// Replaces the registry.
    #[must_use]
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one stage.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateStage` if the id is already taken.
    pub fn stage(
        mut self,
        descriptor: StageDescriptor,
        worker: Arc<dyn StageWorker>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(descriptor, worker)?;
        Ok(self)
    }

    /// Sets the decision provider. Defaults to [`FallbackPlanner`].
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn DecisionProvider>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate()?;

        Ok(Orchestrator::from_parts(
            Arc::new(self.registry),
            self.planner.unwrap_or_else(|| Arc::new(FallbackPlanner::new())),
            self.config,
            self.events.unwrap_or_else(|| Arc::new(NoOpEventSink)),
        ))
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("stages", &self.registry.ids())
            .field("planner", &self.planner.as_ref().map(|p| p.name().to_string()))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
