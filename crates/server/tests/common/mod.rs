//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock collaborators injected, so job lifecycles can be driven over
//! HTTP without a document platform or converter binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use docfetch_core::{
    config::{DatabaseConfig, ServerConfig, StorageConfig},
    testing::{MockConverter, MockDocumentService},
    Config, DocumentService, JobOrchestrator, JobRunner, JobService, JobStore,
    OrchestratorConfig, ProgressBus, ProgressConfig, SheetReader, SpreadsheetSource,
    SqliteJobStore,
};
use docfetch_server::state::AppState;

/// Re-export fixtures for test convenience
pub use docfetch_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_job_creation() {
///     let fixture = TestFixture::new().await;
///     let path = fixture.write_sheet("index.csv", "Invoice,Supplier\nA-1,Acme\n");
///
///     let response = fixture.post("/api/v1/jobs", fixture.job_body(&path)).await;
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock document platform - configure search results
    pub documents: Arc<MockDocumentService>,
    pub store: Arc<SqliteJobStore>,
    pub runner: Option<Arc<JobRunner>>,
    /// Temporary directory for test database, uploads and output
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture without a runner.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let documents = Arc::new(MockDocumentService::new());

        let orchestrator_config = OrchestratorConfig {
            enabled: test_config.enable_runner,
            poll_interval_ms: 50,
            worker_id: "api-test".to_string(),
            ..Default::default()
        };

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            storage: StorageConfig {
                upload_dir: temp_dir.path().join("uploads"),
                output_dir: temp_dir.path().join("output"),
                temp_dir: temp_dir.path().join("temp"),
            },
            orchestrator: orchestrator_config.clone(),
            ..Default::default()
        };

        let store = Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let bus = Arc::new(ProgressBus::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            &ProgressConfig::default(),
        ));
        let sheets: Arc<dyn SpreadsheetSource> = Arc::new(SheetReader::new());

        let runner = if test_config.enable_runner {
            let orchestrator = Arc::new(JobOrchestrator::new(
                &orchestrator_config,
                store.clone(),
                Arc::clone(&sheets),
                documents.clone(),
                Arc::new(MockConverter::new()),
                bus.clone(),
                config.storage.temp_dir.clone(),
            ));
            let runner = Arc::new(JobRunner::new(
                orchestrator_config,
                store.clone(),
                orchestrator,
            ));
            runner.start().await;
            Some(runner)
        } else {
            None
        };

        let jobs = JobService::new(store.clone(), bus.clone(), runner.clone());
        let service: Option<Arc<dyn DocumentService>> = if test_config.without_documents {
            None
        } else {
            Some(documents.clone())
        };
        let state = Arc::new(AppState::new(
            config,
            jobs,
            bus,
            sheets,
            service,
            runner.clone(),
        ));

        // Create router
        let router = docfetch_server::api::create_router(state);

        Self {
            router,
            documents,
            store,
            runner,
            temp_dir,
        }
    }

    /// Write a spreadsheet into the temp directory and return its path.
    pub fn write_sheet(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write spreadsheet");
        path
    }

    /// Output directory handed to jobs created through [`job_body`].
    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("output")
    }

    /// A creation body for `spreadsheet_path` using the fixture job config.
    pub fn job_body(&self, spreadsheet_path: &std::path::Path) -> Value {
        json!({
            "spreadsheet_path": spreadsheet_path.display().to_string(),
            "output_directory": self.output_dir().display().to_string(),
            "config": fixtures::job_config(),
        })
    }

    /// Create a job from `spreadsheet_path` and return its id.
    pub async fn create_job(&self, spreadsheet_path: &std::path::Path) -> String {
        let response = self
            .post("/api/v1/jobs", self.job_body(spreadsheet_path))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"]
            .as_str()
            .expect("job id")
            .to_string()
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait_for_terminal(&self, job_id: &str) -> Value {
        for _ in 0..200 {
            let response = self.get(&format!("/api/v1/jobs/{}", job_id)).await;
            let status = response.body["status"].as_str().unwrap_or_default();
            if matches!(status, "completed" | "completed_with_errors" | "failed" | "cancelled")
                && response.body["execution_handle"].is_null()
            {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} did not finish in time", job_id);
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, &[]).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), &[]).await
    }

    /// Send a POST request with JSON body and extra headers.
    pub async fn post_with_headers(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.request("POST", path, Some(body), headers).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, &[]).await
    }

    /// Send a PATCH request with JSON body.
    pub async fn patch(&self, path: &str, body: Value) -> TestResponse {
        self.request("PATCH", path, Some(body), &[]).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None, &[]).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.request_raw("POST", path, Body::from(body.to_string()), "application/json")
            .await
    }

    /// Upload `content` as the multipart field `field` named `file_name`.
    pub async fn upload(&self, field: &str, file_name: &str, content: &[u8]) -> TestResponse {
        let boundary = "docfetch-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        self.request_raw(
            "POST",
            "/api/v1/spreadsheets",
            Body::from(body),
            &format!("multipart/form-data; boundary={}", boundary),
        )
        .await
    }

    /// Send a request with a raw body and custom content type.
    async fn request_raw(
        &self,
        method: &str,
        path: &str,
        body: Body,
        content_type: &str,
    ) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", content_type)
            .body(body)
            .unwrap();

        self.send(request).await
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            request_builder = request_builder.header(*name, *value);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
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

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Run jobs in-process with the mock collaborators
    pub enable_runner: bool,
    /// Leave the document service out of the app state
    pub without_documents: bool,
}

impl TestConfig {
    /// Create config with the runner enabled.
    pub fn with_runner() -> Self {
        Self {
            enable_runner: true,
            ..Default::default()
        }
    }

    /// Create config with no document service.
    pub fn without_documents() -> Self {
        Self {
            without_documents: true,
            ..Default::default()
        }
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
