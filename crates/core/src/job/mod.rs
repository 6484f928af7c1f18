//! Job execution: resolve one job and record its outcome.

mod processor;

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::run::JobStatus;
use crate::store::StoreError;

pub use processor::JobProcessor;

/// What happened to a delivered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExecution {
    /// The job was not PENDING (duplicate or stale delivery); nothing done.
    Skipped,
    /// The job reached a terminal status.
    Completed(JobStatus),
    /// A retriable failure put the job back to PENDING for another attempt.
    Requeued { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum JobProcessorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
