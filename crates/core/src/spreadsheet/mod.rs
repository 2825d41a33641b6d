//! Spreadsheet input: parsing index files into ordered rows.

mod delimited;
mod excel;
mod table;

pub use delimited::DelimitedSheetReader;
pub use excel::{ExcelSheetReader, WORKBOOK_EXTENSIONS};

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::job::RowData;

/// Number of rows included in a validation preview.
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Cannot read spreadsheet {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("Unsupported spreadsheet format: {0}")]
    UnsupportedFormat(String),

    #[error("Spreadsheet has no columns")]
    NoColumns,

    #[error("Sheet '{sheet}' not found (available: {})", .available.join(", "))]
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// A parsed sheet: column names in order, rows in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSheet {
    pub columns: Vec<String>,
    pub rows: Vec<RowData>,
}

impl ParsedSheet {
    /// Names from `required` that no column matches (case-insensitive).
    pub fn missing_columns<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|name| {
                !self
                    .columns
                    .iter()
                    .any(|column| column.eq_ignore_ascii_case(name))
            })
            .map(str::to_string)
            .collect()
    }

    /// Fails with `MissingColumns` if any required column is absent.
    pub fn require_columns<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), SpreadsheetError> {
        let missing = self.missing_columns(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SpreadsheetError::MissingColumns(missing))
        }
    }
}

/// Source of spreadsheet rows.
///
/// Implementations block on file I/O; async callers run them on the
/// blocking pool.
pub trait SpreadsheetSource: Send + Sync {
    /// Parse the file at `path`. `sheet` names a worksheet for formats that
    /// have several; single-sheet formats ignore it.
    fn parse(&self, path: &Path, sheet: Option<&str>) -> Result<ParsedSheet, SpreadsheetError>;

    /// Worksheet names in file order. Empty for single-sheet formats.
    fn sheet_names(&self, _path: &Path) -> Result<Vec<String>, SpreadsheetError> {
        Ok(Vec::new())
    }
}

/// Picks the reader for a file by its extension: workbooks go to
/// [`ExcelSheetReader`], everything else to [`DelimitedSheetReader`].
#[derive(Debug, Clone, Default)]
pub struct SheetReader {
    delimited: DelimitedSheetReader,
    workbook: ExcelSheetReader,
}

impl SheetReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn reader_for(&self, path: &Path) -> &dyn SpreadsheetSource {
        let is_workbook = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                WORKBOOK_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
        if is_workbook {
            &self.workbook
        } else {
            &self.delimited
        }
    }
}

impl SpreadsheetSource for SheetReader {
    fn parse(&self, path: &Path, sheet: Option<&str>) -> Result<ParsedSheet, SpreadsheetError> {
        self.reader_for(path).parse(path, sheet)
    }

    fn sheet_names(&self, path: &Path) -> Result<Vec<String>, SpreadsheetError> {
        self.reader_for(path).sheet_names(path)
    }
}

/// Result of checking a spreadsheet before a job is created.
#[derive(Debug, Clone, Serialize)]
pub struct SheetValidation {
    pub is_valid: bool,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub preview: Vec<RowData>,
}

/// Extensions the delimited reader opens, lowercase without dot.
pub const DELIMITED_EXTENSIONS: [&str; 3] = ["csv", "tsv", "txt"];

/// True when [`SheetReader`] can open a file with this name.
pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            DELIMITED_EXTENSIONS
                .iter()
                .chain(WORKBOOK_EXTENSIONS.iter())
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Parse a spreadsheet and report whether it is usable for a job.
pub fn validate_sheet(
    source: &dyn SpreadsheetSource,
    path: &Path,
    sheet: Option<&str>,
    required_columns: &[String],
) -> SheetValidation {
    let mut report = SheetValidation {
        is_valid: false,
        total_rows: 0,
        columns: Vec::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
        preview: Vec::new(),
    };

    let parsed = match source.parse(path, sheet) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        }
    };

    report.total_rows = parsed.rows.len();
    report.columns = parsed.columns.clone();
    report.preview = parsed.rows.iter().take(PREVIEW_ROWS).cloned().collect();

    if let Err(e) = parsed.require_columns(required_columns.iter().map(String::as_str)) {
        report.errors.push(e.to_string());
        return report;
    }

    if parsed.rows.is_empty() {
        report.warnings.push("Spreadsheet contains no data rows".to_string());
    }

    report.is_valid = true;
    report
}
