//! Run orchestrator: the public entry point.
//!
//! Composes the state stores, credential pool, resolver and worker pool:
//! - **Runs**: created with one job per distinct input, each job dispatched
//! - **Workers**: execute jobs concurrently, requeueing retriable failures
//! - **Queries**: run status, job listings and credential health

mod runner;
mod types;

pub use runner::RunOrchestrator;
pub use types::{OrchestratorError, RecoveryReport, StartRunResponse};
