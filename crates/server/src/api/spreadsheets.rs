//! Spreadsheet upload, management and validation handlers.
//!
//! Uploads are stored as `{uuid}_{sanitized name}` and addressed by that
//! stored name.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{error, info};

use docfetch_core::job::RowData;
use docfetch_core::{is_spreadsheet, validate_sheet, SheetValidation, SpreadsheetError};

use super::handlers::ApiError;
use crate::state::AppState;

/// Response for a stored upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Stored name, used by the management endpoints
    pub name: String,
    /// Server-side path to pass as `spreadsheet_path` when creating a job
    pub path: String,
    pub file_name: String,
    pub size: u64,
}

/// A stored upload
#[derive(Debug, Serialize)]
pub struct StoredUpload {
    pub name: String,
    /// Name the file was uploaded with, after sanitizing
    pub file_name: String,
    pub path: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadList {
    pub files: Vec<StoredUpload>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct SheetNames {
    pub name: String,
    pub sheets: Vec<String>,
    pub total_sheets: usize,
}

/// Query parameters for previewing an upload
#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub sheet_name: Option<String>,
    pub rows: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub name: String,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub preview: Vec<RowData>,
}

const DEFAULT_PREVIEW_ROWS: usize = 10;
const MAX_PREVIEW_ROWS: usize = 100;

/// Request body for validating a stored spreadsheet
#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub path: String,
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub required_columns: Vec<String>,
}

/// Reduce an uploaded file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "spreadsheet".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Name an upload was stored under, minus the `{uuid}_` prefix.
fn original_name(stored: &str) -> &str {
    match stored.split_once('_') {
        Some((id, rest)) if !rest.is_empty() && uuid::Uuid::parse_str(id).is_ok() => rest,
        _ => stored,
    }
}

/// Path of an existing upload. Names that are not a single sanitized path
/// component are rejected.
fn upload_path(state: &AppState, name: &str) -> Result<PathBuf, ApiError> {
    if name.is_empty() || sanitize_file_name(name) != name {
        return Err(ApiError::bad_request(format!("Invalid upload name: {}", name)));
    }
    let path = state.upload_dir().join(name);
    if !path.is_file() {
        return Err(ApiError::not_found(format!("Upload not found: {}", name)));
    }
    Ok(path)
}

fn sheet_error(e: SpreadsheetError) -> ApiError {
    match e {
        SpreadsheetError::SheetNotFound { .. } => ApiError::not_found(e.to_string()),
        other => ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, other.to_string()),
    }
}

/// Store a multipart `file` field under the upload directory
pub async fn upload_spreadsheet(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name().unwrap_or("") != "file" {
            continue;
        }
        let file_name = field.file_name().unwrap_or("spreadsheet").to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((file_name, bytes.to_vec())),
            Err(e) => return Err(ApiError::bad_request(format!("Failed to read file: {}", e))),
        }
    }

    let (file_name, data) = upload.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }
    if !is_spreadsheet(std::path::Path::new(&file_name)) {
        return Err(ApiError::bad_request(format!(
            "Unsupported spreadsheet type: {}",
            file_name
        )));
    }

    let upload_dir = state.upload_dir().to_path_buf();
    let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), sanitize_file_name(&file_name));
    let path = upload_dir.join(&stored_name);

    if let Err(e) = tokio::fs::create_dir_all(&upload_dir).await {
        error!(dir = %upload_dir.display(), error = %e, "Failed to create upload directory");
        return Err(ApiError::internal("Failed to store upload"));
    }
    if let Err(e) = tokio::fs::write(&path, &data).await {
        error!(path = %path.display(), error = %e, "Failed to write upload");
        return Err(ApiError::internal("Failed to store upload"));
    }

    info!(path = %path.display(), size = data.len(), "Spreadsheet uploaded");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            name: stored_name,
            path: path.display().to_string(),
            file_name,
            size: data.len() as u64,
        }),
    ))
}

/// Stored spreadsheets, newest first
pub async fn list_uploads(State(state): State<Arc<AppState>>) -> Result<Json<UploadList>, ApiError> {
    let upload_dir = state.upload_dir().to_path_buf();
    let mut entries = match tokio::fs::read_dir(&upload_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(UploadList {
                files: Vec::new(),
                total: 0,
            }))
        }
        Err(e) => {
            error!(dir = %upload_dir.display(), error = %e, "Failed to read upload directory");
            return Err(ApiError::internal("Failed to list uploads"));
        }
    };

    let mut files = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!(dir = %upload_dir.display(), error = %e, "Failed to read upload directory");
                return Err(ApiError::internal("Failed to list uploads"));
            }
        };
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() || !is_spreadsheet(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push(StoredUpload {
            file_name: original_name(&name).to_string(),
            path: path.display().to_string(),
            size: metadata.len(),
            modified: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0),
            name,
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(Json(UploadList {
        total: files.len(),
        files,
    }))
}

pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let path = upload_path(&state, &name)?;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        error!(path = %path.display(), error = %e, "Failed to delete upload");
        return Err(ApiError::internal("Failed to delete upload"));
    }
    info!(path = %path.display(), "Spreadsheet upload deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Worksheet names of a stored workbook. Delimited files have none.
pub async fn list_sheets(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SheetNames>, ApiError> {
    let path = upload_path(&state, &name)?;
    let sheets = state.sheets();
    let names = tokio::task::spawn_blocking(move || sheets.sheet_names(&path))
        .await
        .map_err(|e| ApiError::internal(format!("Sheet listing task failed: {}", e)))?
        .map_err(sheet_error)?;

    Ok(Json(SheetNames {
        name,
        total_sheets: names.len(),
        sheets: names,
    }))
}

/// First rows of a stored spreadsheet, as a job would read them
pub async fn preview_upload(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let path = upload_path(&state, &name)?;
    let rows = params
        .rows
        .unwrap_or(DEFAULT_PREVIEW_ROWS)
        .clamp(1, MAX_PREVIEW_ROWS);

    let sheets = state.sheets();
    let parsed = tokio::task::spawn_blocking(move || {
        sheets.parse(&path, params.sheet_name.as_deref())
    })
    .await
    .map_err(|e| ApiError::internal(format!("Preview task failed: {}", e)))?
    .map_err(sheet_error)?;

    Ok(Json(PreviewResponse {
        name,
        total_rows: parsed.rows.len(),
        columns: parsed.columns,
        preview: parsed.rows.into_iter().take(rows).collect(),
    }))
}

/// Parse a stored spreadsheet and report columns, row count and a preview
pub async fn validate_spreadsheet(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateBody>,
) -> Result<Json<SheetValidation>, ApiError> {
    if body.path.trim().is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }

    let sheets = state.sheets();
    let path = PathBuf::from(body.path);
    let report = tokio::task::spawn_blocking(move || {
        validate_sheet(
            sheets.as_ref(),
            &path,
            body.sheet_name.as_deref(),
            &body.required_columns,
        )
    })
    .await
    .map_err(|e| ApiError::internal(format!("Validation task failed: {}", e)))?;

    Ok(Json(report))
}
