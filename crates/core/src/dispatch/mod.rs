//! Job dispatch.
//!
//! A [`Dispatcher`] hands job tasks to whatever executes them. The local
//! implementation feeds an in-process [`WorkerPool`]; a deployment with a
//! shared store can implement the trait over an external queue instead.
//! Delivery is at-least-once: the job processor tolerates duplicates.

mod local;
mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use local::{local_queue, LocalDispatcher};
pub use worker::WorkerPool;

/// A unit of work: resolve one job of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTask {
    pub run_id: String,
    pub job_id: String,
}

impl JobTask {
    pub fn new(run_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            job_id: job_id.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job queue is closed")]
    Closed,

    #[error("dispatch failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Queue a task for immediate execution.
    async fn dispatch(&self, task: JobTask) -> Result<(), DispatchError>;

    /// Queue a task to run after `delay`.
    async fn dispatch_after(&self, task: JobTask, delay: Duration) -> Result<(), DispatchError>;
}
