//! # Stageloop
//!
//! A confidence-gated orchestration engine for document-analysis workflows.
//!
//! Given a goal and a registry of analysis stages, an [`Orchestrator`]
//! repeatedly asks a decision provider which stage to run next, runs it,
//! folds its result into a shared context and decides whether to stop.
//! Every run produces an append-only [`Trace`].
//!
//! - **Stage registry**: uniquely identified stages with capabilities
//! - **Planning**: pluggable decision providers with a deterministic fallback
//! - **Isolation**: stage failures, panics and timeouts become failed steps
//! - **Termination**: confidence threshold, step budget or exhaustion
//! - **Status**: point-in-time progress of running and finished runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stageloop::prelude::*;
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .stage(StageDescriptor::parse("classify", Capability::Classification)?, classify)?
//!     .stage(StageDescriptor::parse("extract", Capability::Extraction)?, extract)?
//!     .with_config(OrchestratorConfig::from_env()?)
//!     .build()?;
//!
//! let trace = orchestrator.run("review this lease", InitialContext::new()).await;
//! println!("{} steps, stopped: {:?}", trace.len(), trace.stop_reason());
//! ```
//!
//! [`Orchestrator`]: orchestrator::Orchestrator
//! [`Trace`]: trace::Trace

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod stages;
pub mod status;
pub mod testing;
pub mod trace;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{ContextSnapshot, ContextStore};
    pub use crate::core::{LoopState, StepOutcome, StopReason, TraceStatus};
    pub use crate::errors::{
        CompletionError, ConfigError, OrchestratorError, PlanningError, RegistryError,
        StageFailure, StageFailureKind,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::orchestrator::{InitialContext, Orchestrator, OrchestratorBuilder, RunHandle};
    pub use crate::planner::{
        CompletionPlanner, CompletionService, Decision, DecisionProvider, FallbackPlanner,
        PlanningRequest,
    };
    pub use crate::registry::{Capability, StageDescriptor, StageId, StageRegistry};
    pub use crate::stages::{FnStage, StageInput, StageReply, StageWorker};
    pub use crate::status::{StatusHandle, WorkflowStatus};
    pub use crate::trace::{Trace, TraceId};
    pub use crate::utils::Timestamp;
}
