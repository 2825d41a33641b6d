//! Job, record and log entry types, plus the two state machines.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ============================================================================
// Job status
// ============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not started.
    Pending,
    /// Orchestrator is reading and checking the spreadsheet.
    Validating,
    /// Rows are being processed.
    Running,
    /// Stopped at a record boundary by request; resumable.
    Paused,
    /// Every row processed with no failed record (terminal).
    Completed,
    /// Every row processed, at least one record failed (terminal).
    CompletedWithErrors,
    /// Aborted by a job-scoped error (terminal).
    Failed,
    /// Cancelled by request (terminal).
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::Validating,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::CompletedWithErrors,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithErrors
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Whether an external actor (API, operator) may request `to` from this state.
    pub fn can_request(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }

    /// Whether the orchestrator itself may move the job from this state to `to`.
    ///
    /// Terminal states have no exits. FAILED is reachable from every other
    /// state; the remaining edges are the validation hand-off, normal
    /// exhaustion, and acknowledging an external pause or cancel.
    pub fn can_enter_internally(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if to == Failed {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Validating)
                | (Validating, Running)
                | (Running, Completed)
                | (Running, CompletedWithErrors)
                | (Running, Paused)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {}", s))
    }
}

// ============================================================================
// Record status
// ============================================================================

/// Lifecycle state of one spreadsheet row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Searching,
    Found,
    Downloading,
    Processing,
    Completed,
    NotFound,
    Failed,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 8] = [
        RecordStatus::Pending,
        RecordStatus::Searching,
        RecordStatus::Found,
        RecordStatus::Downloading,
        RecordStatus::Processing,
        RecordStatus::Completed,
        RecordStatus::NotFound,
        RecordStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Searching => "searching",
            RecordStatus::Found => "found",
            RecordStatus::Downloading => "downloading",
            RecordStatus::Processing => "processing",
            RecordStatus::Completed => "completed",
            RecordStatus::NotFound => "not_found",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Completed | RecordStatus::NotFound | RecordStatus::Failed
        )
    }

    /// Whether the pipeline may advance a record from this state to `to`.
    pub fn can_advance(&self, to: RecordStatus) -> bool {
        use RecordStatus::*;
        if self.is_terminal() {
            return false;
        }
        if to == Failed {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Searching)
                | (Searching, Found)
                | (Searching, NotFound)
                | (Found, Downloading)
                | (Downloading, Processing)
                | (Processing, Completed)
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown record status: {}", s))
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// ============================================================================
// Job configuration
// ============================================================================

/// Maps a spreadsheet column onto a search field of the document service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFieldMapping {
    pub source_column: String,
    pub target_field: String,
}

impl SearchFieldMapping {
    pub fn new(source_column: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: target_field.into(),
        }
    }
}

/// Post-download transformations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRules {
    /// Convert image artifacts (TIFF, PNG, ...) to PDF.
    #[serde(default = "default_true")]
    pub convert_images: bool,
    /// Filename template with `{Column}` placeholders.
    #[serde(default)]
    pub rename_pattern: Option<String>,
    #[serde(default)]
    pub lowercase_filenames: bool,
}

impl Default for TransformRules {
    fn default() -> Self {
        Self {
            convert_images: true,
            rename_pattern: None,
            lowercase_filenames: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_file_filters() -> Vec<String> {
    vec!["pdf".to_string(), "tif".to_string()]
}

fn default_test_mode_limit() -> u32 {
    10
}

/// Pipeline parameters persisted with each job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub cabinet_id: String,
    pub dialog_id: String,
    pub search_fields: Vec<SearchFieldMapping>,
    /// Allowed artifact extensions, lowercase without dot. Empty allows all.
    #[serde(default = "default_file_filters")]
    pub file_filters: Vec<String>,
    #[serde(default)]
    pub transform_rules: TransformRules,
    /// Columns whose values form the destination folder path, outermost first.
    #[serde(default)]
    pub folder_structure: Vec<String>,
    #[serde(default)]
    pub include_associated_docs: bool,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_test_mode_limit")]
    pub test_mode_limit: u32,
    #[serde(default)]
    pub auto_start: bool,
}

/// Reasons a job configuration is rejected at creation time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobConfigError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("at least one search field mapping is required")]
    NoSearchFields,

    #[error("search field mapping #{index} has an empty column or field name")]
    IncompleteMapping { index: usize },

    #[error("folder_structure entry #{index} is empty")]
    EmptyFolderColumn { index: usize },

    #[error("test_mode_limit must be at least 1")]
    InvalidTestModeLimit,
}

impl JobConfig {
    /// Checks the configuration and returns it normalised: names trimmed,
    /// extension filters lowercased without a leading dot.
    pub fn validated(mut self) -> Result<Self, JobConfigError> {
        self.cabinet_id = self.cabinet_id.trim().to_string();
        self.dialog_id = self.dialog_id.trim().to_string();

        if self.cabinet_id.is_empty() {
            return Err(JobConfigError::EmptyField("cabinet_id"));
        }
        if self.dialog_id.is_empty() {
            return Err(JobConfigError::EmptyField("dialog_id"));
        }
        if self.search_fields.is_empty() {
            return Err(JobConfigError::NoSearchFields);
        }

        for (index, mapping) in self.search_fields.iter_mut().enumerate() {
            mapping.source_column = mapping.source_column.trim().to_string();
            mapping.target_field = mapping.target_field.trim().to_string();
            if mapping.source_column.is_empty() || mapping.target_field.is_empty() {
                return Err(JobConfigError::IncompleteMapping { index });
            }
        }

        for (index, column) in self.folder_structure.iter_mut().enumerate() {
            *column = column.trim().to_string();
            if column.is_empty() {
                return Err(JobConfigError::EmptyFolderColumn { index });
            }
        }

        if self.test_mode && self.test_mode_limit == 0 {
            return Err(JobConfigError::InvalidTestModeLimit);
        }

        self.file_filters = self
            .file_filters
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        if let Some(pattern) = self.transform_rules.rename_pattern.take() {
            let trimmed = pattern.trim();
            if !trimmed.is_empty() {
                self.transform_rules.rename_pattern = Some(trimmed.to_string());
            }
        }

        Ok(self)
    }

    /// Columns that must be present in the spreadsheet.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for column in self
            .search_fields
            .iter()
            .map(|m| m.source_column.as_str())
            .chain(self.folder_structure.iter().map(String::as_str))
        {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    /// Whether an artifact with this extension passes the file filters.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.file_filters.is_empty()
            || self
                .file_filters
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}

// ============================================================================
// Row data
// ============================================================================

/// Ordered column → value snapshot of one spreadsheet row.
///
/// Serialises as a JSON object that keeps the spreadsheet column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowData(Vec<(String, String)>);

impl RowData {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets a column value, replacing an existing entry in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.0.push((column, value)),
        }
    }

    /// Value of a column; exact name first, then case-insensitive.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .or_else(|| self.0.iter().find(|(c, _)| c.eq_ignore_ascii_case(column)))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RowData::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for RowData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RowData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowDataVisitor;

        impl<'de> Visitor<'de> for RowDataVisitor {
            type Value = RowData;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RowData, A::Error> {
                let mut row = RowData::new();
                while let Some((column, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    let value = match value {
                        serde_json::Value::Null => String::new(),
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    row.insert(column, value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowDataVisitor)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// One file retrieved for a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// External document this artifact came from.
    pub document_id: String,
    /// Name the artifact had in the temporary area.
    pub source_name: String,
    /// Current location: temp path until organized, final path afterwards.
    pub saved_path: String,
    pub size_bytes: u64,
    /// Whether a format conversion was applied.
    #[serde(default)]
    pub transformed: bool,
    /// SHA-256 of the downloaded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// One end-to-end bulk retrieval run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub created_by: String,
    pub status: JobStatus,
    pub spreadsheet_path: String,
    pub spreadsheet_name: String,
    pub sheet_name: Option<String>,
    pub output_directory: String,
    pub config: JobConfig,
    pub total_records: u32,
    pub processed_records: u32,
    pub successful_records: u32,
    pub failed_records: u32,
    pub files_downloaded: u32,
    pub error_message: Option<String>,
    /// Opaque handle of the worker currently executing this job.
    pub execution_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Processed rows that were neither successful nor failed.
    pub fn not_found_records(&self) -> u32 {
        self.processed_records
            .saturating_sub(self.successful_records + self.failed_records)
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        let pct = self.processed_records as f64 / self.total_records as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed_records == 0 {
            return 0.0;
        }
        let rate = self.successful_records as f64 / self.processed_records as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

/// The unit of work for one spreadsheet row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub job_id: String,
    /// 1-indexed position in the (possibly truncated) spreadsheet.
    pub row_number: u32,
    pub row_data: RowData,
    pub status: RecordStatus,
    /// External id of the canonical matched document.
    pub document_id: Option<String>,
    pub artifacts: Vec<DownloadedFile>,
    pub output_folder: Option<String>,
    pub error_message: Option<String>,
    /// Pipeline stage that produced the error.
    pub error_stage: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Moves the record along its state machine, stamping timestamps.
    ///
    /// Returns false (and leaves the record untouched) for an illegal edge.
    pub fn advance(&mut self, to: RecordStatus) -> bool {
        if !self.status.can_advance(to) {
            return false;
        }
        let now = Utc::now();
        if self.started_at.is_none() && to != RecordStatus::Pending {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = to;
        true
    }

    /// Marks the record failed at `stage` with a message.
    pub fn fail(&mut self, stage: &str, message: impl Into<String>) {
        if self.advance(RecordStatus::Failed) {
            self.error_stage = Some(stage.to_string());
            self.error_message = Some(message.into());
        }
    }
}

/// Append-only per-job log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub record_id: Option<String>,
    pub row_number: Option<u32>,
    pub details: Option<String>,
}

/// Counter update applied once per processed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Completed { files: u32 },
    NotFound,
    Failed,
}

impl RecordOutcome {
    pub fn from_status(status: RecordStatus, files: u32) -> Option<Self> {
        match status {
            RecordStatus::Completed => Some(RecordOutcome::Completed { files }),
            RecordStatus::NotFound => Some(RecordOutcome::NotFound),
            RecordStatus::Failed => Some(RecordOutcome::Failed),
            _ => None,
        }
    }
}
