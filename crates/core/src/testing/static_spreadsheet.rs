//! In-memory spreadsheet source for testing.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::job::RowData;
use crate::spreadsheet::{ParsedSheet, SpreadsheetError, SpreadsheetSource};

/// Returns the same parsed sheet for every path, or a configured error.
#[derive(Debug, Default)]
pub struct StaticSpreadsheet {
    sheet: Mutex<ParsedSheet>,
    /// When set, `parse` fails as if the file were unreadable.
    failure: Mutex<Option<String>>,
    parsed_paths: Mutex<Vec<PathBuf>>,
}

impl StaticSpreadsheet {
    /// Sheet with the given columns; each row lists values in column order.
    pub fn new(columns: &[&str], rows: &[&[&str]]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values.iter())
                    .map(|(c, v)| (c.clone(), v.to_string()))
                    .collect::<RowData>()
            })
            .collect();

        Self {
            sheet: Mutex::new(ParsedSheet { columns, rows }),
            ..Default::default()
        }
    }

    /// A source whose every parse fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Mutex::new(Some(message.to_string())),
            ..Default::default()
        }
    }

    /// Replace the rows returned by later parses.
    pub fn set_rows(&self, rows: Vec<RowData>) {
        if let Ok(mut sheet) = self.sheet.lock() {
            sheet.rows = rows;
        }
    }

    /// Paths passed to `parse`, in call order.
    pub fn parsed_paths(&self) -> Vec<PathBuf> {
        self.parsed_paths
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }
}

impl SpreadsheetSource for StaticSpreadsheet {
    fn parse(&self, path: &Path, _sheet: Option<&str>) -> Result<ParsedSheet, SpreadsheetError> {
        if let Ok(mut paths) = self.parsed_paths.lock() {
            paths.push(path.to_path_buf());
        }

        let unreadable = |message: String| SpreadsheetError::Unreadable {
            path: path.display().to_string(),
            message,
        };

        if let Some(message) = self
            .failure
            .lock()
            .map_err(|e| unreadable(e.to_string()))?
            .clone()
        {
            return Err(unreadable(message));
        }

        let sheet = self.sheet.lock().map_err(|e| unreadable(e.to_string()))?;
        Ok(sheet.clone())
    }
}
