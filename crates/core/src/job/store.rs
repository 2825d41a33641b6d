//! Job storage trait, requests and filters.

use thiserror::Error;

use crate::job::{
    Job, JobConfig, JobStatus, LogEntry, LogLevel, Record, RecordStatus, RowData,
};

/// Default page size for list queries.
pub const DEFAULT_PAGE_LIMIT: i64 = 100;
/// Largest page size accepted from callers.
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Cannot {operation} job {job_id}: current status is {status}")]
    Conflict {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    #[error("Record {record_id} is still {status}")]
    RecordNotTerminal {
        record_id: String,
        status: RecordStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for JobStoreError {
    fn from(e: rusqlite::Error) -> Self {
        JobStoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for JobStoreError {
    fn from(e: serde_json::Error) -> Self {
        JobStoreError::Database(format!("serialization: {}", e))
    }
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub created_by: String,
    pub spreadsheet_path: String,
    pub spreadsheet_name: String,
    pub sheet_name: Option<String>,
    pub output_directory: String,
    /// Must already be validated.
    pub config: JobConfig,
}

/// Request to append a log line to a job.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub record_id: Option<String>,
    pub row_number: Option<u32>,
    pub details: Option<String>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            record_id: None,
            row_number: None,
            details: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Attach the record this line is about.
    pub fn for_record(mut self, record: &Record) -> Self {
        self.record_id = Some(record.id.clone());
        self.row_number = Some(record.row_number);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub created_by: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            created_by: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Set limit, clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }
}

/// Filter for querying a job's records.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    pub status: Option<RecordStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl RecordFilter {
    /// All records of a job, in row order, without a page cap.
    pub fn all() -> Self {
        Self {
            status: None,
            limit: i64::MAX,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }
}

/// Filter for querying a job's log entries.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            level: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl LogFilter {
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }
}

/// Trait for job storage backends.
///
/// The store is the only mutation path for job and record status. Every
/// status change goes through [`JobStore::request_status`] (external actors)
/// or [`JobStore::set_status`] (the orchestrator), both of which check the
/// edge, stamp timestamps and append the terminal summary log.
pub trait JobStore: Send + Sync {
    // ---- jobs ----

    fn create_job(&self, request: CreateJobRequest) -> Result<Job, JobStoreError>;

    fn get_job(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Apply an externally requested status edge.
    ///
    /// Fails with `InvalidTransition`, leaving the job untouched, when the
    /// edge is not one of the six external edges.
    fn request_status(&self, id: &str, to: JobStatus) -> Result<Job, JobStoreError>;

    /// Apply an orchestrator-internal status edge, optionally setting the
    /// job's error message.
    fn set_status(
        &self,
        id: &str,
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, JobStoreError>;

    fn set_total_records(&self, id: &str, total: u32) -> Result<(), JobStoreError>;

    /// Recompute the job counters from its terminal records.
    ///
    /// Used when resuming, so counters match the record table even if an
    /// earlier run stopped between two writes.
    fn reconcile_counters(&self, id: &str) -> Result<Job, JobStoreError>;

    /// Set the execution handle if the job is RUNNING and has none.
    ///
    /// Returns true when this caller won the claim.
    fn claim_execution(&self, id: &str, handle: &str) -> Result<bool, JobStoreError>;

    fn release_execution(&self, id: &str) -> Result<(), JobStoreError>;

    /// Clear every execution handle that starts with `prefix`.
    ///
    /// Called by a worker at start-up to drop claims left by a previous run of
    /// itself. Returns the number of jobs released.
    fn release_stale_claims(&self, prefix: &str) -> Result<usize, JobStoreError>;

    /// RUNNING jobs no worker has claimed, oldest first.
    fn list_unclaimed_running(&self, limit: i64) -> Result<Vec<Job>, JobStoreError>;

    /// Delete a job with its records and logs.
    ///
    /// Fails with `Conflict` while the job is RUNNING or VALIDATING.
    fn delete_job(&self, id: &str) -> Result<Job, JobStoreError>;

    // ---- records ----

    fn create_record(
        &self,
        job_id: &str,
        row_number: u32,
        row_data: RowData,
    ) -> Result<Record, JobStoreError>;

    /// Persist the mutable fields of a record (status, document, artifacts,
    /// folder, errors, timestamps).
    fn update_record(&self, record: &Record) -> Result<(), JobStoreError>;

    /// Persist a record that reached a terminal status and bump the job
    /// counters for its outcome in the same transaction.
    ///
    /// Fails with `RecordNotTerminal` for a record still in progress.
    fn finish_record(&self, record: &Record) -> Result<Job, JobStoreError>;

    fn list_records(&self, job_id: &str, filter: &RecordFilter)
        -> Result<Vec<Record>, JobStoreError>;

    fn count_records(&self, job_id: &str, filter: &RecordFilter) -> Result<i64, JobStoreError>;

    // ---- logs ----

    fn append_log(&self, job_id: &str, entry: NewLogEntry) -> Result<LogEntry, JobStoreError>;

    fn list_logs(&self, job_id: &str, filter: &LogFilter) -> Result<Vec<LogEntry>, JobStoreError>;

    fn count_logs(&self, job_id: &str, filter: &LogFilter) -> Result<i64, JobStoreError>;
}
