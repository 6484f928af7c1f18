use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{credentials, handlers, middleware::metrics_middleware, runs};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Runs
        .route("/runs", post(runs::start_run))
        .route("/runs/{run_id}", get(runs::get_run))
        .route("/runs/{run_id}/jobs", get(runs::list_jobs))
        .route("/runs/{run_id}/failed", get(runs::list_failed_jobs))
        // Credential pool
        .route("/credentials", get(credentials::get_status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
