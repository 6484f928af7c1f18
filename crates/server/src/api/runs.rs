//! Run API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use tubeid_core::{FailedJob, Job, OrchestratorError, RunStatusReport, StartRunResponse};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting a run
#[derive(Debug, Deserialize)]
pub struct StartRunBody {
    pub analysis_id: i64,
    pub owner_id: i64,
    /// Raw channel references: IDs, handles, URLs or free text
    pub channel_inputs: Vec<String>,
}

/// Response for listing a run's jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub run_id: String,
    pub jobs: Vec<Job>,
    pub total: usize,
}

/// Response for listing a run's failed jobs
#[derive(Debug, Serialize)]
pub struct ListFailedJobsResponse {
    pub run_id: String,
    pub failed: Vec<FailedJob>,
    pub total: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct RunErrorResponse {
    pub error: String,
}

type RunError = (StatusCode, Json<RunErrorResponse>);

fn error_response(e: OrchestratorError) -> RunError {
    let status = match e {
        OrchestratorError::RunNotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            error!("Run request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(RunErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a run
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartRunBody>,
) -> Result<(StatusCode, Json<StartRunResponse>), RunError> {
    state
        .orchestrator()
        .start_run(body.analysis_id, body.owner_id, &body.channel_inputs)
        .await
        .map(|response| (StatusCode::CREATED, Json(response)))
        .map_err(error_response)
}

/// Get a run's status and progress
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusReport>, RunError> {
    state
        .orchestrator()
        .get_run_status(&run_id)
        .map(Json)
        .map_err(error_response)
}

/// List all jobs of a run
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<ListJobsResponse>, RunError> {
    let jobs = state
        .orchestrator()
        .list_jobs(&run_id)
        .map_err(error_response)?;
    Ok(Json(ListJobsResponse {
        run_id,
        total: jobs.len(),
        jobs,
    }))
}

/// List the FAILED jobs of a run with their last error
pub async fn list_failed_jobs(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<ListFailedJobsResponse>, RunError> {
    let failed = state
        .orchestrator()
        .list_failed_jobs(&run_id)
        .map_err(error_response)?;
    Ok(Json(ListFailedJobsResponse {
        run_id,
        total: failed.len(),
        failed,
    }))
}
