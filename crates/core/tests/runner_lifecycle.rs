//! Runner lifecycle integration tests.
//!
//! Jobs reach the runner through the service (in-process enqueue) or by
//! being discovered as unclaimed RUNNING jobs.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docfetch_core::{
    testing::{fixtures, MockConverter, MockDocumentService, StaticSpreadsheet},
    Job, JobOrchestrator, JobRunner, JobService, JobStatus, JobStore, OrchestratorConfig,
    ProgressBus, ProgressConfig, ProgressEvent, SqliteJobStore,
};

struct TestHarness {
    store: Arc<SqliteJobStore>,
    documents: Arc<MockDocumentService>,
    bus: Arc<ProgressBus>,
    runner: Arc<JobRunner>,
    service: JobService,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteJobStore::new(&temp_dir.path().join("test.db"))
                .expect("Failed to create job store"),
        );
        let documents = Arc::new(MockDocumentService::new());
        let sheet = Arc::new(StaticSpreadsheet::new(
            &["Invoice", "Supplier"],
            &[&["A-1", "Acme"], &["A-2", "Globex"]],
        ));
        let bus = Arc::new(ProgressBus::new(store.clone(), &ProgressConfig::default()));

        let config = OrchestratorConfig {
            max_concurrent_jobs: 2,
            poll_interval_ms: 50,
            worker_id: "test-worker".to_string(),
            ..Default::default()
        };
        let orchestrator = Arc::new(JobOrchestrator::new(
            &config,
            store.clone(),
            sheet,
            documents.clone(),
            Arc::new(MockConverter::new()),
            bus.clone(),
            temp_dir.path().join("tmp"),
        ));
        let runner = Arc::new(JobRunner::new(config, store.clone(), orchestrator));
        let service = JobService::new(store.clone(), bus.clone(), Some(runner.clone()));

        Self {
            store,
            documents,
            bus,
            runner,
            service,
            temp_dir,
        }
    }

    fn create_job(&self) -> Job {
        self.service
            .create(fixtures::create_request(
                self.temp_dir.path().join("index.csv"),
                self.temp_dir.path().join("out"),
            ))
            .expect("Failed to create job")
    }

    /// Poll the store until the job leaves RUNNING.
    async fn wait_for_finish(&self, job_id: &str) -> Job {
        for _ in 0..200 {
            let job = self.store.get_job(job_id).unwrap().unwrap();
            if job.status.is_terminal() && job.execution_handle.is_none() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} did not finish in time", job_id);
    }
}

#[tokio::test]
async fn test_started_job_runs_to_completion() {
    let h = TestHarness::new();
    h.documents.add_document("A-1", "doc-1", b"one").await;
    h.runner.start().await;

    let job = h.create_job();
    let mut subscription = h.bus.subscribe(&job.id).unwrap();
    h.service.start(&job.id).unwrap();

    let job = h.wait_for_finish(&job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_records, 2);
    assert_eq!(job.successful_records, 1);

    // Snapshot first, completed last.
    let mut types = Vec::new();
    while let Some(event) = subscription.next().await {
        types.push(event.event_type());
        if matches!(event, ProgressEvent::Completed { .. }) {
            break;
        }
    }
    assert_eq!(types.first(), Some(&"status_update"));
    assert_eq!(types.last(), Some(&"completed"));
    assert_eq!(types.iter().filter(|t| **t == "progress").count(), 2);

    h.runner.stop().await;
    assert!(!h.runner.status().await.running);
}

#[tokio::test]
async fn test_unclaimed_running_job_is_discovered() {
    let h = TestHarness::new();
    let job = h.create_job();
    // Started by another process: RUNNING, but never enqueued here.
    h.store.request_status(&job.id, JobStatus::Running).unwrap();

    h.runner.start().await;
    let job = h.wait_for_finish(&job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_records, 2);

    h.runner.stop().await;
}

#[tokio::test]
async fn test_stale_claims_released_on_start() {
    let h = TestHarness::new();
    let job = h.create_job();
    h.store.request_status(&job.id, JobStatus::Running).unwrap();
    assert!(h
        .store
        .claim_execution(&job.id, "test-worker:dead-run")
        .unwrap());

    h.runner.start().await;
    let job = h.wait_for_finish(&job.id).await;
    assert_eq!(job.status, JobStatus::Completed);

    h.runner.stop().await;
}

#[tokio::test]
async fn test_status_reports_configuration() {
    let h = TestHarness::new();
    let status = h.runner.status().await;
    assert!(!status.running);
    assert_eq!(status.worker_id, "test-worker");
    assert_eq!(status.max_concurrent_jobs, 2);
    assert!(status.active_jobs.is_empty());
}
