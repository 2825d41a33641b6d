//! Live job progress for connected observers.
//!
//! The orchestrator hands events to a [`ProgressPublisher`]. In a single
//! process that is the [`ProgressBus`] itself; when the orchestrator runs in a
//! separate worker it is an [`OutboxPublisher`], and the serving process runs
//! an [`OutboxRelay`] feeding its own bus.

mod bus;
mod config;
mod event;
mod outbox;

pub use bus::{ProgressBus, Subscription};
pub use config::{ProgressConfig, ProgressTransport};
pub use event::{ClientMessage, JobSummary, ProgressCounts, ProgressEvent};
pub use outbox::{OutboxEntry, OutboxPublisher, OutboxRelay};

use thiserror::Error;

use crate::job::JobStoreError;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("Outbox error: {0}")]
    Outbox(String),
}

impl From<rusqlite::Error> for ProgressError {
    fn from(e: rusqlite::Error) -> Self {
        ProgressError::Outbox(e.to_string())
    }
}

impl From<serde_json::Error> for ProgressError {
    fn from(e: serde_json::Error) -> Self {
        ProgressError::Outbox(format!("serialization: {}", e))
    }
}

/// Sink for the orchestrator's progress events.
///
/// Publishing is best effort: callers log a failure and carry on.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, job_id: &str, event: ProgressEvent) -> Result<(), ProgressError>;
}
