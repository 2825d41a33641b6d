//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use docfetch_core::{
    CreateJobRequest, Job, JobConfig, JobFilter, JobStatus, LogEntry, LogFilter, LogLevel,
    Record, RecordFilter, RecordStatus,
};

use super::handlers::ApiError;
use super::middleware::Requester;
use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    /// Path of an uploaded spreadsheet on the server
    pub spreadsheet_path: String,
    /// Display name; defaults to the file name of `spreadsheet_path`
    pub spreadsheet_name: Option<String>,
    pub sheet_name: Option<String>,
    /// Output root; defaults to the configured storage output directory
    pub output_directory: Option<String>,
    pub config: JobConfig,
}

/// Request body for an externally requested status change
#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: JobStatus,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<JobStatus>,
    pub created_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for listing records
#[derive(Debug, Deserialize)]
pub struct ListRecordsParams {
    pub status: Option<RecordStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for listing logs
#[derive(Debug, Deserialize)]
pub struct ListLogsParams {
    pub level: Option<LogLevel>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A job plus derived progress figures
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    pub progress_percentage: f64,
    pub success_rate: f64,
    pub not_found_records: u32,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            progress_percentage: job.progress_percentage(),
            success_rate: job.success_rate(),
            not_found_records: job.not_found_records(),
            job,
        }
    }
}

/// One page of a listing
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new job, started immediately when `config.auto_start` is set
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Requester(created_by): Requester,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    if body.spreadsheet_path.trim().is_empty() {
        return Err(ApiError::bad_request("spreadsheet_path must not be empty"));
    }

    let spreadsheet_name = body.spreadsheet_name.unwrap_or_else(|| {
        std::path::Path::new(&body.spreadsheet_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| body.spreadsheet_path.clone())
    });
    let output_directory = body
        .output_directory
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| state.default_output_dir().display().to_string());

    let job = state.jobs().create(CreateJobRequest {
        created_by,
        spreadsheet_path: body.spreadsheet_path,
        spreadsheet_name,
        sheet_name: body.sheet_name,
        output_directory,
        config: body.config,
    })?;

    Ok((StatusCode::CREATED, Json(job.into())))
}

/// List jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<PageResponse<JobResponse>>, ApiError> {
    let (limit, offset) = page(params.limit, params.offset);
    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status {
        filter = filter.with_status(status);
    }
    if let Some(created_by) = params.created_by {
        filter = filter.with_created_by(created_by);
    }

    let (jobs, total) = state.jobs().list(&filter)?;
    Ok(Json(PageResponse {
        items: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.jobs().get(&id)?;
    Ok(Json(job.into()))
}

/// Apply a status change (start, pause, resume, cancel)
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.jobs().update_status(&id, body.status)?;
    Ok(Json(job.into()))
}

pub async fn start_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.jobs().start(&id)?;
    Ok(Json(job.into()))
}

/// Delete a job with its records and logs; refused while it runs
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.jobs().delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ListRecordsParams>,
) -> Result<Json<PageResponse<Record>>, ApiError> {
    let (limit, offset) = page(params.limit, params.offset);
    let mut filter = RecordFilter::default().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status {
        filter = filter.with_status(status);
    }

    let (records, total) = state.jobs().list_records(&id, &filter)?;
    Ok(Json(PageResponse {
        items: records,
        total,
        limit,
        offset,
    }))
}

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ListLogsParams>,
) -> Result<Json<PageResponse<LogEntry>>, ApiError> {
    let (limit, offset) = page(params.limit, params.offset);
    let mut filter = LogFilter::default().with_limit(limit).with_offset(offset);
    if let Some(level) = params.level {
        filter = filter.with_level(level);
    }

    let (logs, total) = state.jobs().list_logs(&id, &filter)?;
    Ok(Json(PageResponse {
        items: logs,
        total,
        limit,
        offset,
    }))
}
