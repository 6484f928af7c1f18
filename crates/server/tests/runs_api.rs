//! Run API integration tests.
//!
//! Drives runs through the HTTP surface: POST a batch, poll its status,
//! inspect jobs, failures and the credential pool.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{fixtures, TestFixture};
use tubeid_core::ApiError;

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_hides_keys() {
    let fixture = TestFixture::with_keys(&["secret-key-a", "secret-key-b"]).await;
    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["youtube"]["api_credentials_configured"], 2);

    let text = response.body.to_string();
    assert!(!text.contains("secret-key-a"));
    assert!(!text.contains("secret-key-b"));
}

#[tokio::test]
async fn test_start_run_and_poll_until_finished() {
    let fixture = TestFixture::new().await;
    fixture
        .api
        .add_handle("MrBeast", fixtures::MRBEAST_CHANNEL_ID);

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({
                "analysis_id": 42,
                "owner_id": 7,
                "channel_inputs": [
                    "@MrBeast",
                    "https://youtube.com/channel/UC-lHJZR3Gqxm24_Vd_AJ5Yw",
                    "UC-lHJZR3Gqxm24_Vd_AJ5Yw"
                ]
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["jobs_created"], 2);
    let run_id = response.body["run_id"].as_str().unwrap().to_string();

    let status = fixture.wait_for_run(&run_id).await;
    assert_eq!(status["progress"], 1.0);
    assert_eq!(status["total_jobs"], 2);
    assert_eq!(status["status_counts"]["DONE"], 2);
    assert!(status["finished_at"].is_string());

    let jobs = fixture.get(&format!("/api/v1/runs/{}/jobs", run_id)).await;
    assert_status!(jobs, StatusCode::OK);
    assert_eq!(jobs.body["total"], 2);
    assert_eq!(jobs.body["jobs"][0]["raw_input"], "@MrBeast");
    assert_eq!(
        jobs.body["jobs"][0]["resolved_channel_id"],
        fixtures::MRBEAST_CHANNEL_ID
    );
}

#[tokio::test]
async fn test_failed_jobs_are_listed() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({
                "analysis_id": 1,
                "owner_id": 1,
                "channel_inputs": ["https://example.com/not-youtube", "some free text"]
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    let run_id = response.body["run_id"].as_str().unwrap().to_string();

    let status = fixture.wait_for_run(&run_id).await;
    assert_eq!(status["status_counts"]["FAILED"], 1);
    assert_eq!(status["status_counts"]["NEEDS_SEARCH"], 1);

    let failed = fixture.get(&format!("/api/v1/runs/{}/failed", run_id)).await;
    assert_status!(failed, StatusCode::OK);
    assert_eq!(failed.body["total"], 1);
    assert_eq!(
        failed.body["failed"][0]["raw_input"],
        "https://example.com/not-youtube"
    );
    assert_eq!(failed.body["failed"][0]["error"]["kind"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_empty_run_finishes_immediately() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post(
            "/api/v1/runs",
            json!({ "analysis_id": 1, "owner_id": 1, "channel_inputs": ["", "  "] }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["jobs_created"], 0);

    let run_id = response.body["run_id"].as_str().unwrap();
    let status = fixture.get(&format!("/api/v1/runs/{}", run_id)).await;
    assert_eq!(status.body["run_status"], "FINISHED");
    assert_eq!(status.body["progress"], 1.0);
}

#[tokio::test]
async fn test_unknown_run_returns_404() {
    let fixture = TestFixture::new().await;
    for path in [
        "/api/v1/runs/does-not-exist",
        "/api/v1/runs/does-not-exist/jobs",
        "/api/v1/runs/does-not-exist/failed",
    ] {
        let response = fixture.get(path).await;
        assert_status!(response, StatusCode::NOT_FOUND);
        assert!(response.body["error"]
            .as_str()
            .unwrap()
            .contains("does-not-exist"));
    }
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_raw("/api/v1/runs", "{not json").await;
    assert!(response.status.is_client_error());

    let response = fixture
        .post("/api/v1/runs", json!({ "analysis_id": 1, "owner_id": 1 }))
        .await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_credentials_endpoint_reports_quota() {
    let fixture = TestFixture::with_keys(&["key-one", "key-two"]).await;
    fixture
        .api
        .add_handle("MrBeast", fixtures::MRBEAST_CHANNEL_ID);
    fixture.api.exhaust_key("key-one");

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({ "analysis_id": 1, "owner_id": 1, "channel_inputs": ["@MrBeast"] }),
        )
        .await;
    let run_id = response.body["run_id"].as_str().unwrap().to_string();
    let status = fixture.wait_for_run(&run_id).await;
    assert_eq!(status["status_counts"]["DONE"], 1);

    let credentials = fixture.get("/api/v1/credentials").await;
    assert_status!(credentials, StatusCode::OK);
    assert_eq!(credentials.body["total"], 2);
    assert_eq!(credentials.body["active"], 1);
    assert_eq!(
        credentials.body["credentials"][0]["status"],
        "QUOTA_EXHAUSTED"
    );
    assert!(!credentials.body.to_string().contains("key-one"));
}

#[tokio::test]
async fn test_transient_failures_retried_through_api() {
    let fixture = TestFixture::new().await;
    fixture
        .api
        .add_handle("MrBeast", fixtures::MRBEAST_CHANNEL_ID);
    fixture
        .api
        .fail_next(1, ApiError::Transient("HTTP 503".into()));

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({ "analysis_id": 1, "owner_id": 1, "channel_inputs": ["@MrBeast"] }),
        )
        .await;
    let run_id = response.body["run_id"].as_str().unwrap().to_string();

    let status = fixture.wait_for_run(&run_id).await;
    assert_eq!(status["status_counts"]["DONE"], 1);
    assert_eq!(fixture.api.call_count(), 2);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("tubeid_http_requests_total"));
    assert!(body.contains("tubeid_credentials_by_status"));
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/nope").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "not found");
}
