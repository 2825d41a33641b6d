//! Types for the job orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobConfigError, JobStatus, JobStoreError};
use crate::pipeline::PipelineError;

/// Errors that abort a job run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Job is not in a state `execute` accepts.
    #[error("invalid job state: expected pending or running, got {actual}")]
    InvalidState { actual: JobStatus },

    /// Unreadable spreadsheet or missing columns.
    #[error("{0}")]
    Validation(String),

    /// The document service rejected the credentials or was unreachable at logon.
    #[error("Document service authentication failed: {0}")]
    Authentication(String),

    /// Wall-clock ceiling exceeded.
    #[error("Job exceeded its time limit of {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Persistence failure.
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
}

impl From<PipelineError> for OrchestratorError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Store(e) => OrchestratorError::Store(e),
            other => OrchestratorError::Validation(other.to_string()),
        }
    }
}

/// Errors from the job management surface.
#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("Invalid job configuration: {0}")]
    InvalidConfig(#[from] JobConfigError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Current status of the runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerStatus {
    /// Whether the runner loop is active.
    pub running: bool,
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    /// Jobs executing (or waiting for a slot) in this process.
    pub active_jobs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_pipeline_error_stays_store() {
        let err: OrchestratorError =
            PipelineError::Store(JobStoreError::Database("disk full".to_string())).into();
        assert!(matches!(err, OrchestratorError::Store(_)));
    }

    #[test]
    fn test_runner_status_serialization() {
        let status = RunnerStatus {
            running: true,
            worker_id: "local".to_string(),
            max_concurrent_jobs: 3,
            active_jobs: vec!["job-1".to_string()],
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"active_jobs\":[\"job-1\"]"));
    }
}
