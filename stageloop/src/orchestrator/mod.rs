//! Orchestration: the plan, execute and gate loop.
//!
//! An [`Orchestrator`] is built once through [`OrchestratorBuilder`] and
//! then runs any number of goals, either inline with
//! [`Orchestrator::run`] or spawned with [`Orchestrator::start`].

mod builder;
mod engine;
mod gate;
mod handle;

#[cfg(test)]
mod integration_tests;

pub use builder::OrchestratorBuilder;
pub use engine::{InitialContext, Orchestrator};
pub use gate::{ConfidenceGate, GateVerdict};
pub use handle::RunHandle;
