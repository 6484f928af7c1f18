//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! backed by a real orchestrator and a mock channel API, so runs can be
//! driven end to end without network access.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tubeid_core::{testing::MockChannelApi, RunOrchestrator, StoreBackend};
use tubeid_server::state::AppState;

/// Re-export fixtures for test convenience
pub use tubeid_core::testing::fixtures;

/// Test fixture for API testing with a mock channel API.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_start_run() {
///     let fixture = TestFixture::new().await;
///     fixture.api.add_handle("MrBeast", fixtures::MRBEAST_CHANNEL_ID);
///
///     let response = fixture.post("/api/v1/runs", json!({
///         "analysis_id": 1,
///         "owner_id": 1,
///         "channel_inputs": ["@MrBeast"]
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock channel API - register handles, exhaust keys, script failures
    pub api: Arc<MockChannelApi>,
    /// The orchestrator behind the router (started)
    pub orchestrator: Arc<RunOrchestrator>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with two API keys.
    pub async fn new() -> Self {
        Self::with_keys(&["test-key-1", "test-key-2"]).await
    }

    /// Create a test fixture with the given API keys, backed by SQLite.
    pub async fn with_keys(keys: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = fixtures::config(keys);
        config.database.backend = StoreBackend::Sqlite;
        config.database.path = temp_dir.path().join("test.db");

        let api = Arc::new(MockChannelApi::new());
        let orchestrator = Arc::new(
            RunOrchestrator::from_config(&config, api.clone())
                .expect("Failed to create orchestrator"),
        );
        orchestrator
            .start()
            .await
            .expect("Failed to start orchestrator");

        let state = Arc::new(AppState::new(config, Arc::clone(&orchestrator)));
        let router = tubeid_server::api::create_router(state);

        Self {
            router,
            api,
            orchestrator,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        TestResponse {
            status,
            body: parse_json(&bytes),
        }
    }

    /// Send a GET request and return the body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll a run until it is FINISHED and return its final status body.
    pub async fn wait_for_run(&self, run_id: &str) -> Value {
        let path = format!("/api/v1/runs/{}", run_id);
        for _ in 0..500 {
            let response = self.get(&path).await;
            if response.body["run_status"] == "FINISHED" {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} did not finish", run_id);
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        let (status, bytes) = self.send(request).await;

        TestResponse {
            status,
            body: parse_json(&bytes),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, body_bytes.to_vec())
    }
}

fn parse_json(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
