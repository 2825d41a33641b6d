//! Drives one job from its spreadsheet to a terminal (or paused) state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::convert::DocumentConverter;
use crate::docservice::DocumentService;
use crate::job::{
    Job, JobStatus, JobStore, JobStoreError, NewLogEntry, Record, RecordFilter, RecordStatus,
    RowData,
};
use crate::metrics::{
    FILES_PLACED, JOBS_FINISHED, JOB_DURATION, RECORDS_PROCESSED, RECORD_DURATION,
    RECORD_FAILURES,
};
use crate::pipeline::{stage, RecordPipeline, StageOutcome};
use crate::progress::{ProgressEvent, ProgressPublisher};
use crate::spreadsheet::{ParsedSheet, SpreadsheetSource};

use super::config::OrchestratorConfig;
use super::types::OrchestratorError;

/// Why the row loop returned.
enum LoopExit {
    /// Every row has a terminal record.
    Exhausted,
    /// The job left RUNNING (pause, cancel, or another actor's write).
    StatusChanged(JobStatus),
    /// This process is shutting down; the job stays RUNNING for the next claim.
    Shutdown,
}

/// Executes jobs. One instance is shared by every concurrently running job.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    sheets: Arc<dyn SpreadsheetSource>,
    documents: Arc<dyn DocumentService>,
    pipeline: RecordPipeline,
    publisher: Arc<dyn ProgressPublisher>,
    job_timeout: Duration,
    stopping: AtomicBool,
}

impl JobOrchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        store: Arc<dyn JobStore>,
        sheets: Arc<dyn SpreadsheetSource>,
        documents: Arc<dyn DocumentService>,
        converter: Arc<dyn DocumentConverter>,
        publisher: Arc<dyn ProgressPublisher>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        let pipeline = RecordPipeline::new(
            Arc::clone(&documents),
            converter,
            Arc::clone(&store),
            temp_root,
        );
        Self {
            store,
            sheets,
            documents,
            pipeline,
            publisher,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            stopping: AtomicBool::new(false),
        }
    }

    /// Ask running executions to return at their next record boundary.
    pub fn request_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Allow executions again after a shutdown request.
    pub fn clear_shutdown(&self) {
        self.stopping.store(false, Ordering::SeqCst);
    }

    fn publish(&self, job_id: &str, event: ProgressEvent) {
        if let Err(e) = self.publisher.publish(job_id, event) {
            warn!(job_id = %job_id, error = %e, "Failed to publish progress event");
        }
    }

    fn log(&self, job_id: &str, entry: NewLogEntry) -> Result<(), OrchestratorError> {
        self.store.append_log(job_id, entry)?;
        Ok(())
    }

    /// Run `job_id` until every row is processed, the job is paused or
    /// cancelled, or a job-scoped error aborts it.
    ///
    /// The outcome is observable through the store. `Err` is returned only
    /// when the job cannot be run at all, or when marking it failed itself
    /// failed.
    pub async fn execute(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            return Err(OrchestratorError::InvalidState { actual: job.status });
        }

        let started = Instant::now();
        info!(job_id = %job_id, status = %job.status, "Executing job");

        match self.run(job, started).await {
            Ok(LoopExit::Exhausted) => {
                let status = self.finalize(job_id).await?;
                JOB_DURATION
                    .with_label_values(&[status.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                Ok(())
            }
            Ok(LoopExit::StatusChanged(status)) => {
                info!(job_id = %job_id, status = %status, "Job stopped at record boundary");
                if status.is_terminal() {
                    count_finished(status);
                    self.cleanup(job_id).await;
                }
                Ok(())
            }
            Ok(LoopExit::Shutdown) => {
                info!(job_id = %job_id, "Execution interrupted by shutdown, job left running");
                Ok(())
            }
            Err(e) => {
                let status = self.fail(job_id, &e)?;
                JOB_DURATION
                    .with_label_values(&[status.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                self.cleanup(job_id).await;
                Ok(())
            }
        }
    }

    async fn run(&self, job: Job, started: Instant) -> Result<LoopExit, OrchestratorError> {
        let job_id = job.id.clone();

        if job.status == JobStatus::Pending {
            self.store.set_status(&job_id, JobStatus::Validating, None)?;
        }

        let sheet = self.load_sheet(&job).await?;
        let total_in_sheet = sheet.rows.len();
        let mut rows = sheet.rows;

        if job.config.test_mode && rows.len() > job.config.test_mode_limit as usize {
            rows.truncate(job.config.test_mode_limit as usize);
            self.log(
                &job_id,
                NewLogEntry::info(format!(
                    "Test mode: processing first {} of {} rows",
                    rows.len(),
                    total_in_sheet
                )),
            )?;
        }

        self.documents
            .authenticate()
            .await
            .map_err(|e| OrchestratorError::Authentication(e.to_string()))?;

        self.store.set_total_records(&job_id, rows.len() as u32)?;

        let existing: HashMap<u32, Record> = self
            .store
            .list_records(&job_id, &RecordFilter::all())?
            .into_iter()
            .map(|r| (r.row_number, r))
            .collect();
        let done = existing.values().filter(|r| r.status.is_terminal()).count();

        let job = if job.status == JobStatus::Pending {
            self.store.set_status(&job_id, JobStatus::Running, None)?
        } else if !existing.is_empty() {
            self.store.reconcile_counters(&job_id)?
        } else {
            self.store
                .get_job(&job_id)?
                .ok_or_else(|| OrchestratorError::JobNotFound(job_id.clone()))?
        };
        self.publish(&job_id, ProgressEvent::status_update(&job));

        if done > 0 {
            self.log(
                &job_id,
                NewLogEntry::info(format!(
                    "Resuming: {} of {} rows already processed",
                    done,
                    rows.len()
                )),
            )?;
        } else {
            self.log(
                &job_id,
                NewLogEntry::info(format!("Processing {} rows", rows.len())),
            )?;
        }

        self.process_rows(&job_id, rows, existing, started).await
    }

    async fn load_sheet(&self, job: &Job) -> Result<ParsedSheet, OrchestratorError> {
        let sheets = Arc::clone(&self.sheets);
        let path = PathBuf::from(&job.spreadsheet_path);
        let sheet_name = job.sheet_name.clone();

        let parsed = tokio::task::spawn_blocking(move || sheets.parse(&path, sheet_name.as_deref()))
            .await
            .map_err(|e| OrchestratorError::Validation(format!("spreadsheet reader panicked: {}", e)))?
            .map_err(|e| OrchestratorError::Validation(e.to_string()))?;

        parsed
            .require_columns(job.config.required_columns())
            .map_err(|e| OrchestratorError::Validation(e.to_string()))?;

        debug!(
            job_id = %job.id,
            rows = parsed.rows.len(),
            columns = parsed.columns.len(),
            "Spreadsheet loaded"
        );
        Ok(parsed)
    }

    async fn process_rows(
        &self,
        job_id: &str,
        rows: Vec<RowData>,
        mut existing: HashMap<u32, Record>,
        started: Instant,
    ) -> Result<LoopExit, OrchestratorError> {
        for (index, row_data) in rows.into_iter().enumerate() {
            let row_number = index as u32 + 1;

            let previous = existing.remove(&row_number);
            if previous.as_ref().is_some_and(|r| r.status.is_terminal()) {
                continue;
            }

            // Status is re-read before a record is created, so a pause between
            // rows leaves no record behind for the next row.
            let job = self
                .store
                .get_job(job_id)?
                .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
            if job.status != JobStatus::Running {
                return Ok(LoopExit::StatusChanged(job.status));
            }
            if self.stopping.load(Ordering::SeqCst) {
                return Ok(LoopExit::Shutdown);
            }
            if started.elapsed() > self.job_timeout {
                return Err(OrchestratorError::Timeout {
                    timeout_secs: self.job_timeout.as_secs(),
                });
            }

            let record = match previous {
                Some(record) if record.status == RecordStatus::Pending => record,
                Some(mut interrupted) => {
                    // Left mid-pipeline by a crashed run; its stage cannot be redone.
                    interrupted.fail(stage::PERSISTENCE, "Interrupted before completion");
                    let entry = NewLogEntry::error(format!(
                        "Row {}: Interrupted before completion",
                        interrupted.row_number
                    ))
                    .with_details(format!("stage: {}", stage::PERSISTENCE));
                    self.account(&job, &interrupted, "failed", entry)?;
                    continue;
                }
                None => self.store.create_record(job_id, row_number, row_data)?,
            };

            self.process_record(&job, record).await?;
        }

        Ok(LoopExit::Exhausted)
    }

    async fn process_record(&self, job: &Job, mut record: Record) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        debug!(job_id = %job.id, row = record.row_number, "Processing record");

        let (action, entry) = match self.pipeline.run(job, &mut record).await {
            Ok(StageOutcome::Completed { files }) => {
                FILES_PLACED.inc_by(files as u64);
                let message = format!(
                    "Row {}: {} file(s) saved to {}",
                    record.row_number,
                    files,
                    record.output_folder.as_deref().unwrap_or("")
                );
                ("completed", NewLogEntry::info(message))
            }
            Ok(StageOutcome::NotFound) => {
                let message = format!("Row {}: no matching document", record.row_number);
                ("not_found", NewLogEntry::warning(message))
            }
            Err(e) if e.is_job_fatal() => return Err(e.into()),
            Err(e) => {
                let stage = e.stage();
                RECORD_FAILURES.with_label_values(&[stage]).inc();
                record.fail(stage, e.to_string());

                let message = format!("Row {}: {}", record.row_number, e);
                let entry = NewLogEntry::error(message).with_details(format!("stage: {}", stage));
                ("failed", entry)
            }
        };

        RECORD_DURATION
            .with_label_values(&[action])
            .observe(started.elapsed().as_secs_f64());
        self.account(job, &record, action, entry)
    }

    /// Commit a finished record together with its counter bump, then log it
    /// and emit a progress event.
    fn account(
        &self,
        job: &Job,
        record: &Record,
        action: &str,
        entry: NewLogEntry,
    ) -> Result<(), OrchestratorError> {
        let updated = self.store.finish_record(record)?;
        RECORDS_PROCESSED.with_label_values(&[action]).inc();

        let message = entry.message.clone();
        self.log(&job.id, entry.for_record(record))?;
        self.publish(
            &job.id,
            ProgressEvent::progress(&updated, Some(record.row_number), action, Some(message)),
        );
        Ok(())
    }

    /// Move an exhausted job to its completed status.
    async fn finalize(&self, job_id: &str) -> Result<JobStatus, OrchestratorError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if job.status != JobStatus::Running {
            // Paused or cancelled after the last record; that write wins.
            count_finished(job.status);
            return Ok(job.status);
        }

        let target = if job.failed_records > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        };

        let job = match self.store.set_status(job_id, target, None) {
            Ok(job) => job,
            Err(JobStoreError::InvalidTransition { from, .. }) => {
                count_finished(from);
                return Ok(from);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            job_id = %job_id,
            status = %job.status,
            processed = job.processed_records,
            successful = job.successful_records,
            failed = job.failed_records,
            "Job finished"
        );
        count_finished(job.status);
        self.publish(job_id, ProgressEvent::completed(&job));
        self.cleanup(job_id).await;

        Ok(job.status)
    }

    /// Mark the job failed after a job-scoped error.
    ///
    /// A job that already reached a terminal status (cancelled while the
    /// error was in flight) keeps it. Returns the status the job ends in.
    fn fail(&self, job_id: &str, cause: &OrchestratorError) -> Result<JobStatus, OrchestratorError> {
        let message = cause.to_string();

        match self
            .store
            .set_status(job_id, JobStatus::Failed, Some(&message))
        {
            Ok(_) => {}
            Err(JobStoreError::InvalidTransition { from, .. }) => {
                warn!(job_id = %job_id, status = %from, error = %message, "Job error after it had already ended");
                count_finished(from);
                return Ok(from);
            }
            Err(e) => return Err(e.into()),
        }

        error!(job_id = %job_id, error = %message, "Job failed");
        count_finished(JobStatus::Failed);
        self.publish(job_id, ProgressEvent::error(job_id, message));
        Ok(JobStatus::Failed)
    }

    async fn cleanup(&self, job_id: &str) {
        remove_temp_dir(self.pipeline.job_temp_dir(job_id)).await;
    }
}

/// Only terminal statuses count as finished; a pause is resumable.
fn count_finished(status: JobStatus) {
    if status.is_terminal() {
        JOBS_FINISHED.with_label_values(&[status.as_str()]).inc();
    }
}

async fn remove_temp_dir(dir: PathBuf) {
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed job temp directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove job temp directory"),
    }
}
