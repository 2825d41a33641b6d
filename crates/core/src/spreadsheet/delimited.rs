//! Delimited text reader (CSV / TSV) with RFC 4180 quoting.

use std::path::Path;

use tracing::{debug, info};

use super::table::build_sheet;
use super::{ParsedSheet, SpreadsheetError, SpreadsheetSource};

/// Reads `.csv`, `.tsv` and `.txt` index files.
///
/// The first non-blank line is the header. Cells and header names are
/// trimmed, fully blank rows and fully blank columns are dropped.
#[derive(Debug, Clone, Default)]
pub struct DelimitedSheetReader;

impl DelimitedSheetReader {
    pub fn new() -> Self {
        Self
    }

    fn delimiter_for(path: &Path, content: &str) -> Result<char, SpreadsheetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(','),
            "tsv" => Ok('\t'),
            "txt" => {
                let header = content.lines().next().unwrap_or("");
                let tabs = header.matches('\t').count();
                let semis = header.matches(';').count();
                let commas = header.matches(',').count();
                if tabs >= commas && tabs >= semis && tabs > 0 {
                    Ok('\t')
                } else if semis > commas {
                    Ok(';')
                } else {
                    Ok(',')
                }
            }
            other => Err(SpreadsheetError::UnsupportedFormat(if other.is_empty() {
                path.display().to_string()
            } else {
                format!(".{}", other)
            })),
        }
    }

    /// Split text into records of raw cells. Tracks the 1-based line a record
    /// starts on for error messages.
    fn tokenize(content: &str, delimiter: char) -> Result<Vec<(usize, Vec<String>)>, SpreadsheetError> {
        let mut records = Vec::new();
        let mut record: Vec<String> = Vec::new();
        let mut cell = String::new();
        let mut in_quotes = false;
        let mut line = 1usize;
        let mut record_line = 1usize;
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if in_quotes {
                match c {
                    '"' if chars.peek() == Some(&'"') => {
                        chars.next();
                        cell.push('"');
                    }
                    '"' => in_quotes = false,
                    '\n' => {
                        line += 1;
                        cell.push('\n');
                    }
                    _ => cell.push(c),
                }
                continue;
            }

            match c {
                '"' if cell.trim().is_empty() => {
                    cell.clear();
                    in_quotes = true;
                }
                c if c == delimiter => record.push(std::mem::take(&mut cell)),
                '\r' => {}
                '\n' => {
                    record.push(std::mem::take(&mut cell));
                    records.push((record_line, std::mem::take(&mut record)));
                    line += 1;
                    record_line = line;
                }
                _ => cell.push(c),
            }
        }

        if in_quotes {
            return Err(SpreadsheetError::Parse {
                line: record_line,
                message: "unterminated quoted field".to_string(),
            });
        }

        if !cell.is_empty() || !record.is_empty() {
            record.push(cell);
            records.push((record_line, record));
        }

        Ok(records)
    }

    fn parse_str(&self, path: &Path, content: &str) -> Result<ParsedSheet, SpreadsheetError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let delimiter = Self::delimiter_for(path, content)?;

        let records = Self::tokenize(content, delimiter)?
            .into_iter()
            .map(|(_, cells)| cells);
        let parsed = build_sheet(&path.display().to_string(), records)?;

        debug!(
            path = %path.display(),
            columns = parsed.columns.len(),
            rows = parsed.rows.len(),
            "Parsed delimited spreadsheet"
        );
        Ok(parsed)
    }
}

impl SpreadsheetSource for DelimitedSheetReader {
    fn parse(&self, path: &Path, sheet: Option<&str>) -> Result<ParsedSheet, SpreadsheetError> {
        if let Some(sheet) = sheet {
            debug!(sheet, "Sheet name ignored for delimited input");
        }

        // Reject the format before touching the file.
        Self::delimiter_for(path, "")?;

        let bytes = std::fs::read(path).map_err(|e| SpreadsheetError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let content = String::from_utf8_lossy(&bytes);

        let parsed = self.parse_str(path, &content)?;
        info!(
            path = %path.display(),
            rows = parsed.rows.len(),
            columns = parsed.columns.len(),
            "Spreadsheet read"
        );
        Ok(parsed)
    }
}
