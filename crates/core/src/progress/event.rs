//! Messages exchanged with progress subscribers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};

/// Counter block carried by status updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub processed: u32,
    pub total: u32,
    pub percentage: f64,
    pub successful: u32,
    pub failed: u32,
}

/// Final tallies carried by the completed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total_files_downloaded: u32,
    pub successful_records: u32,
    pub failed_records: u32,
    pub not_found_records: u32,
}

/// Server-to-subscriber message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Current counters, sent on connect, on request and on status changes.
    StatusUpdate {
        job_id: String,
        status: JobStatus,
        progress: ProgressCounts,
    },
    /// Emitted after each record.
    Progress {
        job_id: String,
        status: JobStatus,
        processed_records: u32,
        total_records: u32,
        progress_percentage: f64,
        current_record: Option<u32>,
        current_action: Option<String>,
        latest_log: Option<String>,
    },
    /// The job finished processing its rows.
    Completed {
        job_id: String,
        status: JobStatus,
        summary: JobSummary,
    },
    /// The job was aborted.
    Error { job_id: String, error_message: String },
    /// Idle keepalive.
    Heartbeat { timestamp: i64 },
    /// Reply to a client ping.
    Pong,
}

impl ProgressEvent {
    pub fn status_update(job: &Job) -> Self {
        ProgressEvent::StatusUpdate {
            job_id: job.id.clone(),
            status: job.status,
            progress: ProgressCounts {
                processed: job.processed_records,
                total: job.total_records,
                percentage: job.progress_percentage(),
                successful: job.successful_records,
                failed: job.failed_records,
            },
        }
    }

    pub fn progress(
        job: &Job,
        current_record: Option<u32>,
        current_action: impl Into<String>,
        latest_log: Option<String>,
    ) -> Self {
        ProgressEvent::Progress {
            job_id: job.id.clone(),
            status: job.status,
            processed_records: job.processed_records,
            total_records: job.total_records,
            progress_percentage: job.progress_percentage(),
            current_record,
            current_action: Some(current_action.into()),
            latest_log,
        }
    }

    pub fn completed(job: &Job) -> Self {
        ProgressEvent::Completed {
            job_id: job.id.clone(),
            status: job.status,
            summary: JobSummary {
                total_files_downloaded: job.files_downloaded,
                successful_records: job.successful_records,
                failed_records: job.failed_records,
                not_found_records: job.not_found_records(),
            },
        }
    }

    pub fn error(job_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            job_id: job_id.into(),
            error_message: error_message.into(),
        }
    }

    pub fn heartbeat() -> Self {
        ProgressEvent::Heartbeat {
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Wire tag, also used as a metric label.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::StatusUpdate { .. } => "status_update",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Heartbeat { .. } => "heartbeat",
            ProgressEvent::Pong => "pong",
        }
    }
}

/// Subscriber-to-server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe, answered with `pong`.
    Ping,
    /// Request a fresh `status_update`.
    GetStatus,
}
