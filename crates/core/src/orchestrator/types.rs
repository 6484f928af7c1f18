//! Types for the run orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Run not found.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// State store error.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Credential pool error.
    #[error("credential pool error: {0}")]
    Pool(#[from] crate::credential::PoolError),

    /// Dispatch error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),
}

/// Result of starting a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: String,
    /// Jobs created after dropping blank and duplicate inputs.
    pub jobs_created: usize,
}

/// Jobs touched by startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// PROCESSING jobs past the stale timeout, put back to PENDING.
    pub stale_reset: usize,
    /// PENDING jobs dispatched again (including the reset ones).
    pub redispatched: usize,
    /// RUNNING runs with every job terminal, finalized at startup.
    pub finalized: usize,
}
