//! Stage worker trait and adapters.
//!
//! A stage worker is a capability unit (classification, extraction, ...)
//! invoked once per selection. Workers report through an explicit
//! `Result`: a [`StageReply`] on success, a [`StageFailure`] otherwise.

mod result;

pub use result::{StageInput, StageReply};

use crate::errors::StageFailure;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for stage workers.
#[async_trait]
pub trait StageWorker: Send + Sync + Debug {
    /// Runs the stage against the goal and the current context.
    ///
    /// # Errors
    ///
    /// Returns a [`StageFailure`] when the worker cannot produce a usable
    /// reply. The executor records it as a zero-confidence step.
    async fn run(&self, input: &StageInput) -> Result<StageReply, StageFailure>;
}

/// An async function-based stage worker.
pub struct FnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageReply, StageFailure>> + Send,
{
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageReply, StageFailure>> + Send,
{
    /// Creates a new function-based stage worker.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _future: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageReply, StageFailure>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> StageWorker for FnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageReply, StageFailure>> + Send,
{
    async fn run(&self, input: &StageInput) -> Result<StageReply, StageFailure> {
        (self.func)(input.clone()).await
    }
}
