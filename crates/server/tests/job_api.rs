//! Job API integration tests.
//!
//! Drive the router in-process; jobs that need executing use the mock
//! document service through an in-process runner.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{TestConfig, TestFixture};

const SHEET: &str = "Invoice,Supplier\nA-1,Acme\nA-2,Globex\n";

#[tokio::test]
async fn test_create_job_returns_pending_job() {
    let fixture = TestFixture::new().await;
    let sheet = fixture.write_sheet("index.csv", SHEET);

    let response = fixture
        .post_with_headers(
            "/api/v1/jobs",
            fixture.job_body(&sheet),
            &[("X-Requested-By", "alice")],
        )
        .await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["status"], "pending");
    assert_eq!(response.body["created_by"], "alice");
    assert_eq!(response.body["spreadsheet_name"], "index.csv");
    assert_eq!(response.body["config"]["cabinet_id"], "cabinet-1");
    assert_eq!(response.body["progress_percentage"], 0.0);
    assert!(response.body["execution_handle"].is_null());
}

#[tokio::test]
async fn test_create_job_defaults_output_directory() {
    let fixture = TestFixture::new().await;
    let sheet = fixture.write_sheet("index.csv", SHEET);
    let mut body = fixture.job_body(&sheet);
    body.as_object_mut().unwrap().remove("output_directory");

    let response = fixture.post("/api/v1/jobs", body).await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["created_by"], "anonymous");
    assert_eq!(
        response.body["output_directory"],
        fixture.output_dir().display().to_string()
    );
}

#[tokio::test]
async fn test_create_job_rejects_invalid_config() {
    let fixture = TestFixture::new().await;
    let sheet = fixture.write_sheet("index.csv", SHEET);
    let mut body = fixture.job_body(&sheet);
    body["config"]["search_fields"] = json!([]);

    let response = fixture.post("/api/v1/jobs", body).await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("search field"));
}

#[tokio::test]
async fn test_create_job_rejects_malformed_json() {
    let fixture = TestFixture::new().await;
    let response = fixture.post_raw("/api/v1/jobs", "{not json").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_job_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/jobs/does-not-exist").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].is_string());

    let response = fixture.get("/api/v1/jobs/does-not-exist/records").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_jobs_filters_and_paginates() {
    let fixture = TestFixture::new().await;
    let sheet = fixture.write_sheet("index.csv", SHEET);

    let first = fixture.create_job(&sheet).await;
    fixture.create_job(&sheet).await;
    fixture.create_job(&sheet).await;

    let response = fixture
        .patch(&format!("/api/v1/jobs/{}", first), json!({"status": "cancelled"}))
        .await;
    assert_status!(response, StatusCode::OK);

    let response = fixture.get("/api/v1/jobs?limit=2").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 3);
    assert_eq!(response.body["limit"], 2);
    assert_eq!(response.body["items"].as_array().unwrap().len(), 2);

    let response = fixture.get("/api/v1/jobs?status=cancelled").await;
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["items"][0]["id"], first.as_str());

    let response = fixture.get("/api/v1/jobs?status=bogus").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_patch_rejects_invalid_transition() {
    let fixture = TestFixture::new().await;
    let sheet = fixture.write_sheet("index.csv", SHEET);
    let job_id = fixture.create_job(&sheet).await;

    // PENDING cannot be paused
    let response = fixture
        .patch(&format!("/api/v1/jobs/{}", job_id), json!({"status": "paused"}))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    // Internal-only states are never accepted from outside
    let response = fixture
        .patch(&format!("/api/v1/jobs/{}", job_id), json!({"status": "completed"}))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = fixture.get(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_eq!(response.body["status"], "pending");
}

#[tokio::test]
async fn test_delete_refused_while_running() {
    // No runner: a started job stays RUNNING waiting for a worker.
    let fixture = TestFixture::new().await;
    let sheet = fixture.write_sheet("index.csv", SHEET);
    let job_id = fixture.create_job(&sheet).await;

    let response = fixture
        .post_empty(&format!("/api/v1/jobs/{}/start", job_id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "running");
    assert!(response.body["started_at"].is_string());

    let response = fixture.delete(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_status!(response, StatusCode::CONFLICT);

    let response = fixture
        .patch(&format!("/api/v1/jobs/{}", job_id), json!({"status": "cancelled"}))
        .await;
    assert_status!(response, StatusCode::OK);

    let response = fixture.delete(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = fixture.get(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_started_job_runs_to_completion() {
    let fixture = TestFixture::with_config(TestConfig::with_runner()).await;
    fixture
        .documents
        .add_document("A-1", "doc-1", b"%PDF-1.4 one")
        .await;
    let sheet = fixture.write_sheet("index.csv", SHEET);
    let job_id = fixture.create_job(&sheet).await;

    let response = fixture
        .post_empty(&format!("/api/v1/jobs/{}/start", job_id))
        .await;
    assert_status!(response, StatusCode::OK);

    let job = fixture.wait_for_terminal(&job_id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["total_records"], 2);
    assert_eq!(job["processed_records"], 2);
    assert_eq!(job["successful_records"], 1);
    assert_eq!(job["not_found_records"], 1);
    assert_eq!(job["progress_percentage"], 100.0);
    assert!(job["completed_at"].is_string());

    let response = fixture
        .get(&format!("/api/v1/jobs/{}/records", job_id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);

    let response = fixture
        .get(&format!("/api/v1/jobs/{}/records?status=not_found", job_id))
        .await;
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["items"][0]["row_number"], 2);
    assert_eq!(response.body["items"][0]["row_data"]["Invoice"], "A-2");

    let response = fixture
        .get(&format!("/api/v1/jobs/{}/records?status=completed", job_id))
        .await;
    let record = &response.body["items"][0];
    assert_eq!(record["document_id"], "doc-1");
    assert_eq!(record["artifacts"].as_array().unwrap().len(), 1);

    let organized = fixture.output_dir().join("Acme");
    assert!(organized.is_dir(), "expected {:?}", organized);

    let response = fixture
        .get(&format!("/api/v1/jobs/{}/logs?level=warning", job_id))
        .await;
    assert_status!(response, StatusCode::OK);
    let logs = response.body["items"].as_array().unwrap();
    assert!(!logs.is_empty());
    assert!(logs.iter().all(|l| l["level"] == "warning"));

    // Finished jobs cannot be restarted
    let response = fixture
        .post_empty(&format!("/api/v1/jobs/{}/start", job_id))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_column_fails_job() {
    let fixture = TestFixture::with_config(TestConfig::with_runner()).await;
    let sheet = fixture.write_sheet("index.csv", "Invoice\nA-1\n");
    let job_id = fixture.create_job(&sheet).await;

    fixture
        .post_empty(&format!("/api/v1/jobs/{}/start", job_id))
        .await;

    let job = fixture.wait_for_terminal(&job_id).await;
    assert_eq!(job["status"], "failed");
    assert!(job["error_message"].as_str().unwrap().contains("Supplier"));

    let response = fixture
        .get(&format!("/api/v1/jobs/{}/logs?level=error", job_id))
        .await;
    assert!(response.body["total"].as_i64().unwrap() >= 1);
}
