//! Workbook reader (`.xlsx`, `.xlsm`, `.xlsb`, `.xls`, `.ods`) backed by calamine.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader, Sheets};
use tracing::{debug, info};

use super::table::build_sheet;
use super::{ParsedSheet, SpreadsheetError, SpreadsheetSource};

/// Extensions this reader opens, lowercase without dot.
pub const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Reads one worksheet of a workbook.
///
/// Without a sheet name the first worksheet is read. Names match exactly
/// first, then ignoring ASCII case.
#[derive(Debug, Clone, Default)]
pub struct ExcelSheetReader;

type Workbook = Sheets<std::io::BufReader<std::fs::File>>;

impl ExcelSheetReader {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<Workbook, SpreadsheetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
            return Err(SpreadsheetError::UnsupportedFormat(if ext.is_empty() {
                path.display().to_string()
            } else {
                format!(".{}", ext)
            }));
        }

        open_workbook_auto(path).map_err(|e| SpreadsheetError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn resolve_sheet(names: &[String], requested: Option<&str>) -> Result<String, SpreadsheetError> {
        let Some(requested) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
            return names.first().cloned().ok_or(SpreadsheetError::NoColumns);
        };

        names
            .iter()
            .find(|name| name.as_str() == requested)
            .or_else(|| names.iter().find(|name| name.eq_ignore_ascii_case(requested)))
            .cloned()
            .ok_or_else(|| SpreadsheetError::SheetNotFound {
                sheet: requested.to_string(),
                available: names.to_vec(),
            })
    }
}

/// Render a cell the way it reads in the workbook.
///
/// Whole floats lose their `.0`, dates are ISO formatted, error cells are
/// blank.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => dt.format("%Y-%m-%d").to_string(),
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
    }
}

impl SpreadsheetSource for ExcelSheetReader {
    fn parse(&self, path: &Path, sheet: Option<&str>) -> Result<ParsedSheet, SpreadsheetError> {
        let mut workbook = Self::open(path)?;
        let name = Self::resolve_sheet(&workbook.sheet_names(), sheet)?;

        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| SpreadsheetError::Unreadable {
                path: path.display().to_string(),
                message: format!("sheet {}: {}", name, e),
            })?;

        let raw = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let parsed = build_sheet(&path.display().to_string(), raw)?;

        info!(
            path = %path.display(),
            sheet = %name,
            rows = parsed.rows.len(),
            columns = parsed.columns.len(),
            "Spreadsheet read"
        );
        Ok(parsed)
    }

    fn sheet_names(&self, path: &Path) -> Result<Vec<String>, SpreadsheetError> {
        let names = Self::open(path)?.sheet_names();
        debug!(path = %path.display(), sheets = names.len(), "Listed worksheets");
        Ok(names)
    }
}
