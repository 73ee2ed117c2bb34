//! Execution traces.
//!
//! A [`Trace`] is the replayable record of one run. The [`TraceRecorder`]
//! is its only writer; [`TraceWatch`] handles give concurrent readers
//! consistent snapshots.

mod model;
mod recorder;

pub use model::{StepExport, Trace, TraceExport, TraceId, TraceSummary};
pub use recorder::{TraceRecorder, TraceView, TraceWatch};
