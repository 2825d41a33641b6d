//! Job execution integration tests.
//!
//! These tests drive whole jobs through the orchestrator against mock
//! collaborators and a real SQLite store:
//! pending/running -> validating -> running -> completed | paused | failed

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use docfetch_core::{
    metrics::JOBS_FINISHED,
    testing::{fixtures, MockConverter, MockDocumentService, RecordingPublisher, StaticSpreadsheet},
    Job, JobConfig, JobOrchestrator, JobStatus, JobStore, JobStoreError, LogFilter, LogLevel,
    OrchestratorConfig, OrchestratorError, ParsedSheet, ProgressBus, ProgressConfig,
    ProgressEvent, ProgressPublisher, RecordFilter, RecordStatus, SpreadsheetError,
    SpreadsheetSource, SqliteJobStore, Subscription,
};

/// Cancels its job through the store while the sheet is read, then fails.
struct CancellingSheet {
    store: Arc<SqliteJobStore>,
    job_id: String,
}

impl SpreadsheetSource for CancellingSheet {
    fn parse(&self, _path: &Path, _sheet: Option<&str>) -> Result<ParsedSheet, SpreadsheetError> {
        self.store
            .request_status(&self.job_id, JobStatus::Cancelled)
            .unwrap();
        Err(SpreadsheetError::NoColumns)
    }
}

/// Test helper holding every collaborator of one orchestrator.
struct TestHarness {
    store: Arc<SqliteJobStore>,
    documents: Arc<MockDocumentService>,
    converter: Arc<MockConverter>,
    sheet: Arc<StaticSpreadsheet>,
    publisher: Arc<RecordingPublisher>,
    temp_dir: TempDir,
}

impl TestHarness {
    /// A sheet with `Invoice`/`Supplier` columns and one row per invoice.
    fn new(rows: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteJobStore::new(&temp_dir.path().join("test.db"))
                .expect("Failed to create job store"),
        );
        let rows: Vec<[&str; 2]> = rows.iter().map(|(i, s)| [*i, *s]).collect();
        let rows: Vec<&[&str]> = rows.iter().map(|r| &r[..]).collect();

        Self {
            store,
            documents: Arc::new(MockDocumentService::new()),
            converter: Arc::new(MockConverter::new()),
            sheet: Arc::new(StaticSpreadsheet::new(&["Invoice", "Supplier"], &rows)),
            publisher: Arc::new(RecordingPublisher::new()),
            temp_dir,
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("out")
    }

    fn scratch_dir(&self) -> PathBuf {
        self.temp_dir.path().join("tmp")
    }

    fn orchestrator_with(
        &self,
        config: OrchestratorConfig,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> JobOrchestrator {
        JobOrchestrator::new(
            &config,
            self.store.clone(),
            self.sheet.clone(),
            self.documents.clone(),
            self.converter.clone(),
            publisher,
            self.scratch_dir(),
        )
    }

    fn orchestrator(&self) -> JobOrchestrator {
        self.orchestrator_with(OrchestratorConfig::default(), self.publisher.clone())
    }

    fn create_job(&self, configure: impl FnOnce(&mut JobConfig)) -> Job {
        let mut request =
            fixtures::create_request(self.temp_dir.path().join("index.csv"), self.output_dir());
        configure(&mut request.config);
        self.store.create_job(request).expect("Failed to create job")
    }

    /// Create a job and move it to RUNNING the way the service does.
    fn running_job(&self, configure: impl FnOnce(&mut JobConfig)) -> Job {
        let job = self.create_job(configure);
        self.store
            .request_status(&job.id, JobStatus::Running)
            .expect("Failed to start job")
    }

    fn job(&self, id: &str) -> Job {
        self.store.get_job(id).unwrap().expect("job exists")
    }

    fn record_statuses(&self, id: &str) -> Vec<RecordStatus> {
        self.store
            .list_records(id, &RecordFilter::all())
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect()
    }

    /// Run `action` the first time a search for `value` starts.
    async fn on_search(&self, value: &'static str, action: impl Fn() + Send + Sync + 'static) {
        let fired = AtomicBool::new(false);
        self.documents
            .set_search_hook(Arc::new(move |searched: &str| {
                if searched == value && !fired.swap(true, Ordering::SeqCst) {
                    action();
                }
            }))
            .await;
    }
}

#[tokio::test]
async fn test_mixed_outcomes_complete() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Globex"), ("A-3", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"%PDF one").await;
    h.documents.add_document("A-3", "doc-3", b"%PDF three").await;
    let job = h.running_job(|_| {});

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_records, 3);
    assert_eq!(job.processed_records, 3);
    assert_eq!(job.successful_records, 2);
    assert_eq!(job.failed_records, 0);
    assert_eq!(job.not_found_records(), 1);
    assert_eq!(job.files_downloaded, 2);
    assert!(job.completed_at.is_some());
    assert_eq!(
        h.record_statuses(&job.id),
        vec![
            RecordStatus::Completed,
            RecordStatus::NotFound,
            RecordStatus::Completed
        ]
    );

    assert!(h.output_dir().join("Acme").join("doc-1_document.pdf").exists());
    assert!(h.output_dir().join("Acme").join("doc-3_document.pdf").exists());
    assert!(!h.scratch_dir().join(&job.id).exists());

    let types = h.publisher.event_types_for(&job.id);
    assert_eq!(
        types,
        vec!["status_update", "progress", "progress", "progress", "completed"]
    );

    let warnings = h
        .store
        .list_logs(&job.id, &LogFilter::default().with_level(LogLevel::Warning))
        .unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].row_number, Some(2));
}

#[tokio::test]
async fn test_download_failure_completes_with_errors() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme"), ("A-3", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"one").await;
    h.documents.add_document("A-2", "doc-2", b"two").await;
    h.documents.add_document("A-3", "doc-3", b"three").await;
    h.documents.fail_download("doc-2").await;
    let job = h.running_job(|_| {});

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.processed_records, 3);
    assert_eq!(job.successful_records, 2);
    assert_eq!(job.failed_records, 1);

    let failed = h
        .store
        .list_records(&job.id, &RecordFilter::all().with_status(RecordStatus::Failed))
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].row_number, 2);
    assert_eq!(failed[0].error_stage.as_deref(), Some("download"));

    let errors = h
        .store
        .list_logs(&job.id, &LogFilter::default().with_level(LogLevel::Error))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].details.as_deref(), Some("stage: download"));

    match h.publisher.events_for(&job.id).last() {
        Some(ProgressEvent::Completed { status, summary, .. }) => {
            assert_eq!(*status, JobStatus::CompletedWithErrors);
            assert_eq!(summary.failed_records, 1);
            assert_eq!(summary.total_files_downloaded, 2);
        }
        other => panic!("expected completed event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pause_stops_at_record_boundary() {
    let h = TestHarness::new(&[
        ("A-1", "Acme"),
        ("A-2", "Acme"),
        ("A-3", "Acme"),
        ("A-4", "Acme"),
        ("A-5", "Acme"),
    ]);
    let job = h.running_job(|_| {});

    let store = h.store.clone();
    let job_id = job.id.clone();
    h.on_search("A-1", move || {
        store.request_status(&job_id, JobStatus::Paused).unwrap();
    })
    .await;

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.processed_records, 1);
    assert_eq!(h.record_statuses(&job.id).len(), 1);
    assert_eq!(h.documents.search_count().await, 1);
    assert!(!h.publisher.event_types_for(&job.id).contains(&"completed"));

    // A pause is resumable and never counts as a finished execution.
    assert_eq!(JOBS_FINISHED.with_label_values(&["paused"]).get(), 0);
}

#[tokio::test]
async fn test_resume_skips_terminal_rows() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme"), ("A-3", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"one").await;
    h.documents.add_document("A-3", "doc-3", b"three").await;
    let job = h.running_job(|_| {});

    let store = h.store.clone();
    let job_id = job.id.clone();
    h.on_search("A-2", move || {
        store.request_status(&job_id, JobStatus::Paused).unwrap();
    })
    .await;

    let orchestrator = h.orchestrator();
    orchestrator.execute(&job.id).await.unwrap();
    assert_eq!(h.job(&job.id).processed_records, 2);

    h.store.request_status(&job.id, JobStatus::Running).unwrap();
    orchestrator.execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_records, 3);
    assert_eq!(job.successful_records, 2);
    assert_eq!(h.record_statuses(&job.id).len(), 3);

    // Every row was searched exactly once across both runs.
    let searched: Vec<String> = h
        .documents
        .recorded_searches()
        .await
        .into_iter()
        .map(|criteria| criteria[0].value.clone())
        .collect();
    assert_eq!(searched, vec!["A-1", "A-2", "A-3"]);

    let infos = h
        .store
        .list_logs(&job.id, &LogFilter::default().with_level(LogLevel::Info))
        .unwrap();
    assert!(infos.iter().any(|l| l.message.starts_with("Resuming")));
}

#[tokio::test]
async fn test_cancel_mid_run_cleans_up() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme"), ("A-3", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"one").await;
    h.documents.add_document("A-2", "doc-2", b"two").await;
    let job = h.running_job(|_| {});

    let store = h.store.clone();
    let job_id = job.id.clone();
    h.on_search("A-2", move || {
        store.request_status(&job_id, JobStatus::Cancelled).unwrap();
    })
    .await;

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.processed_records, 2);
    assert!(job.completed_at.is_some());
    assert!(!h.scratch_dir().join(&job.id).exists());

    // A cancelled job cannot be restarted.
    assert!(matches!(
        h.store.request_status(&job.id, JobStatus::Running),
        Err(JobStoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        h.orchestrator().execute(&job.id).await,
        Err(OrchestratorError::InvalidState {
            actual: JobStatus::Cancelled
        })
    ));
}

#[tokio::test]
async fn test_name_collisions_get_counter_suffix() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"one").await;
    h.documents.add_document("A-2", "doc-2", b"two").await;
    let job = h.running_job(|c| {
        c.transform_rules.rename_pattern = Some("{Supplier}".to_string());
    });

    h.orchestrator().execute(&job.id).await.unwrap();

    let folder = h.output_dir().join("Acme");
    assert_eq!(std::fs::read(folder.join("Acme.pdf")).unwrap(), b"one");
    assert_eq!(std::fs::read(folder.join("Acme (1).pdf")).unwrap(), b"two");
    assert_eq!(h.job(&job.id).status, JobStatus::Completed);
}

#[tokio::test]
async fn test_missing_column_fails_without_records() {
    let h = TestHarness::new(&[("A-1", "Acme")]);
    let job = h.running_job(|c| c.folder_structure = vec!["Region".to_string()]);

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("Region"));
    assert!(h.record_statuses(&job.id).is_empty());
    assert_eq!(h.documents.authentication_count().await, 0);
    assert_eq!(h.publisher.event_types_for(&job.id), vec!["error"]);

    let errors = h
        .store
        .list_logs(&job.id, &LogFilter::default().with_level(LogLevel::Error))
        .unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn test_unreadable_spreadsheet_fails_pending_job() {
    let h = TestHarness::new(&[]);
    let sheet = Arc::new(StaticSpreadsheet::failing("corrupt file"));
    let orchestrator = JobOrchestrator::new(
        &OrchestratorConfig::default(),
        h.store.clone(),
        sheet,
        h.documents.clone(),
        h.converter.clone(),
        h.publisher.clone(),
        h.scratch_dir(),
    );
    let job = h.create_job(|_| {});

    orchestrator.execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("corrupt file"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_pending_job_passes_through_validation() {
    let h = TestHarness::new(&[("A-1", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"one").await;
    let job = h.create_job(|_| {});

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some());
}

#[tokio::test]
async fn test_authentication_failure_fails_job() {
    let h = TestHarness::new(&[("A-1", "Acme")]);
    h.documents.set_fail_authentication(true).await;
    let job = h.running_job(|_| {});

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .contains("authentication failed"));
    assert!(h.record_statuses(&job.id).is_empty());
    assert_eq!(h.documents.search_count().await, 0);
}

#[tokio::test]
async fn test_test_mode_truncates_rows() {
    let h = TestHarness::new(&[
        ("A-1", "Acme"),
        ("A-2", "Acme"),
        ("A-3", "Acme"),
        ("A-4", "Acme"),
    ]);
    let job = h.running_job(|c| {
        c.test_mode = true;
        c.test_mode_limit = 2;
    });

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.total_records, 2);
    assert_eq!(job.processed_records, 2);
    assert_eq!(h.record_statuses(&job.id).len(), 2);
    assert_eq!(job.status, JobStatus::Completed);

    let logs = h.store.list_logs(&job.id, &LogFilter::default()).unwrap();
    assert!(logs.iter().any(|l| l.message.contains("first 2 of 4")));
}

#[tokio::test]
async fn test_timeout_fails_job() {
    let h = TestHarness::new(&[("A-1", "Acme")]);
    let job = h.running_job(|_| {});
    let config = OrchestratorConfig {
        job_timeout_secs: 0,
        ..Default::default()
    };

    h.orchestrator_with(config, h.publisher.clone())
        .execute(&job.id)
        .await
        .unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("time limit"));
}

#[tokio::test]
async fn test_shutdown_leaves_job_running() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme")]);
    let job = h.running_job(|_| {});
    let orchestrator = h.orchestrator();
    orchestrator.request_shutdown();

    orchestrator.execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.processed_records, 0);

    orchestrator.clear_shutdown();
    orchestrator.execute(&job.id).await.unwrap();
    assert_eq!(h.job(&job.id).status, JobStatus::Completed);
}

#[tokio::test]
async fn test_interrupted_record_is_failed_on_resume() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme")]);
    h.documents.add_document("A-2", "doc-2", b"two").await;
    let job = h.running_job(|_| {});

    // A crashed run left row 1 mid-search.
    let mut record = h
        .store
        .create_record(&job.id, 1, fixtures::row(&[("Invoice", "A-1"), ("Supplier", "Acme")]))
        .unwrap();
    assert!(record.advance(RecordStatus::Searching));
    h.store.update_record(&record).unwrap();

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.failed_records, 1);
    assert_eq!(job.successful_records, 1);

    let records = h.store.list_records(&job.id, &RecordFilter::all()).unwrap();
    assert_eq!(records[0].error_stage.as_deref(), Some("persistence"));
    assert_eq!(h.documents.search_count().await, 1);
}

#[tokio::test]
async fn test_uncounted_terminal_record_is_counted_on_resume() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme")]);
    h.documents.add_document("A-2", "doc-2", b"two").await;
    let job = h.running_job(|_| {});

    // A crashed run stored row 1 as not found without bumping the counters.
    let mut record = h
        .store
        .create_record(&job.id, 1, fixtures::row(&[("Invoice", "A-1"), ("Supplier", "Acme")]))
        .unwrap();
    assert!(record.advance(RecordStatus::Searching));
    assert!(record.advance(RecordStatus::NotFound));
    h.store.update_record(&record).unwrap();
    assert_eq!(h.job(&job.id).processed_records, 0);

    h.orchestrator().execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    let records = h.store.list_records(&job.id, &RecordFilter::all()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_records as usize, records.len());
    assert_eq!(job.successful_records, 1);
    assert_eq!(job.not_found_records(), 1);
    assert_eq!(job.files_downloaded, 1);
    assert_eq!(h.documents.search_count().await, 1);
}

#[tokio::test]
async fn test_error_after_cancel_keeps_cancelled() {
    let h = TestHarness::new(&[]);
    let job = h.running_job(|_| {});
    let sheet = Arc::new(CancellingSheet {
        store: h.store.clone(),
        job_id: job.id.clone(),
    });
    let orchestrator = JobOrchestrator::new(
        &OrchestratorConfig::default(),
        h.store.clone(),
        sheet,
        h.documents.clone(),
        h.converter.clone(),
        h.publisher.clone(),
        h.scratch_dir(),
    );

    orchestrator.execute(&job.id).await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error_message.is_none());

    let logs = h.store.list_logs(&job.id, &LogFilter::default()).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].message.starts_with("Job cancelled"));
    assert!(!h.publisher.event_types_for(&job.id).contains(&"error"));
}

#[tokio::test]
async fn test_mid_job_subscriber_starts_from_store() {
    let h = TestHarness::new(&[("A-1", "Acme"), ("A-2", "Acme"), ("A-3", "Acme")]);
    h.documents.add_document("A-1", "doc-1", b"one").await;
    h.documents.add_document("A-2", "doc-2", b"two").await;
    h.documents.add_document("A-3", "doc-3", b"three").await;
    let job = h.running_job(|_| {});

    let bus = Arc::new(ProgressBus::new(h.store.clone(), &ProgressConfig::default()));
    let late: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let subscriber_bus = bus.clone();
    let slot = late.clone();
    let job_id = job.id.clone();
    h.on_search("A-2", move || {
        let subscription = subscriber_bus.subscribe(&job_id).unwrap();
        *slot.lock().unwrap() = Some(subscription);
    })
    .await;

    h.orchestrator_with(OrchestratorConfig::default(), bus.clone())
        .execute(&job.id)
        .await
        .unwrap();

    let mut subscription = late.lock().unwrap().take().expect("subscribed");

    match subscription.next().await {
        Some(ProgressEvent::StatusUpdate {
            status, progress, ..
        }) => {
            assert_eq!(status, JobStatus::Running);
            assert_eq!(progress.processed, 1);
            assert_eq!(progress.total, 3);
        }
        other => panic!("expected snapshot, got {:?}", other),
    }

    let mut processed = Vec::new();
    loop {
        match subscription.next().await {
            Some(ProgressEvent::Progress {
                processed_records, ..
            }) => processed.push(processed_records),
            Some(ProgressEvent::Completed { status, .. }) => {
                assert_eq!(status, JobStatus::Completed);
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(processed, vec![2, 3]);
}
