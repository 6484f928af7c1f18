//! Credential pool API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tubeid_core::CredentialState;

use crate::state::AppState;

/// Credential pool status response. Keys are never exposed, only their
/// fingerprints.
#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub credentials: Vec<CredentialState>,
    pub active: usize,
    pub total: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct CredentialsErrorResponse {
    pub error: String,
}

/// Get the status of every credential in the pool
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CredentialsResponse>, (StatusCode, Json<CredentialsErrorResponse>)> {
    match state.orchestrator().credential_status() {
        Ok(credentials) => {
            let active = credentials
                .iter()
                .filter(|c| c.status == tubeid_core::CredentialStatus::Active)
                .count();
            Ok(Json(CredentialsResponse {
                total: credentials.len(),
                active,
                credentials,
            }))
        }
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CredentialsErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
