//! Per-record pipeline: search, download, transform, organize.
//!
//! Stages run strictly in order, each gated on the previous one. A
//! `PipelineError` other than `Store` is scoped to the record: the
//! orchestrator marks the record failed and moves on to the next row.

pub mod organize;
mod record;

pub use record::{build_criteria, RecordPipeline};

use thiserror::Error;

use crate::job::JobStoreError;

/// Stage names as stored on failed records.
pub mod stage {
    pub const SEARCH: &str = "search";
    pub const DOWNLOAD: &str = "download";
    pub const TRANSFORM: &str = "transform";
    pub const ORGANIZE: &str = "organize";
    pub const PERSISTENCE: &str = "persistence";
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Document service unavailable: {0}")]
    Connectivity(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Organize failed: {0}")]
    Organize(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl PipelineError {
    /// Stage the error is attributed to.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::InvalidRow(_) | PipelineError::Connectivity(_) => stage::SEARCH,
            PipelineError::Download(_) => stage::DOWNLOAD,
            PipelineError::Transform(_) => stage::TRANSFORM,
            PipelineError::Organize(_) => stage::ORGANIZE,
            PipelineError::Store(_) => stage::PERSISTENCE,
        }
    }

    /// Whether the error must abort the whole job rather than one record.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, PipelineError::Store(_))
    }
}

/// How a record left the pipeline when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// All stages succeeded; `files` artifacts were placed.
    Completed { files: u32 },
    /// The search matched nothing.
    NotFound,
}
