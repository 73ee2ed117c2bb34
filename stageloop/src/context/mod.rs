//! Context management for orchestration runs.
//!
//! This module provides:
//! - A run-scoped mutable store written only by the orchestration loop
//! - Immutable snapshots handed to the planner and stage workers

mod store;

pub use store::{ContextSnapshot, ContextStore};
