//! Cooperative cancellation of orchestration runs.

mod token;

pub use token::{CancelCallback, CancellationToken};
