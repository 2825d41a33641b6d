//! Turning raw cell rows into a [`ParsedSheet`].

use tracing::info;

use super::{ParsedSheet, SpreadsheetError};
use crate::job::RowData;

/// Build a sheet from raw rows in file order.
///
/// Cells are trimmed and fully blank rows dropped. The first remaining row
/// is the header. A column survives if it has a header name or any value;
/// unnamed columns become `Column{n}` and duplicate names get `_2`, `_3`...
/// Body rows that repeat the header (exports that paginate with a header on
/// every page) are dropped.
pub(super) fn build_sheet(
    source: &str,
    raw: impl IntoIterator<Item = Vec<String>>,
) -> Result<ParsedSheet, SpreadsheetError> {
    let mut rows = raw
        .into_iter()
        .map(|cells| {
            cells
                .into_iter()
                .map(|c| c.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|cells| cells.iter().any(|c| !c.is_empty()));

    let header = rows.next().ok_or(SpreadsheetError::NoColumns)?;
    let body: Vec<Vec<String>> = rows.collect();

    let width = body
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0);

    let mut columns: Vec<(usize, String)> = Vec::new();
    for idx in 0..width {
        let name = header.get(idx).cloned().unwrap_or_default();
        let has_values = body
            .iter()
            .any(|cells| cells.get(idx).is_some_and(|c| !c.is_empty()));

        if name.is_empty() && !has_values {
            continue;
        }

        let mut name = if name.is_empty() {
            format!("Column{}", idx + 1)
        } else {
            name
        };
        if columns.iter().any(|(_, existing)| *existing == name) {
            let base = name.clone();
            let mut n = 2;
            while columns.iter().any(|(_, existing)| *existing == name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
        }
        columns.push((idx, name));
    }

    if columns.is_empty() {
        return Err(SpreadsheetError::NoColumns);
    }

    let before = body.len();
    let body: Vec<Vec<String>> = body
        .into_iter()
        .filter(|cells| !repeats_header(&header, cells))
        .collect();
    if body.len() < before {
        info!(source, filtered = before - body.len(), "Dropped repeated header rows");
    }

    let rows: Vec<RowData> = body
        .iter()
        .map(|cells| {
            columns
                .iter()
                .map(|(idx, name)| (name.clone(), cells.get(*idx).cloned().unwrap_or_default()))
                .collect()
        })
        .collect();

    Ok(ParsedSheet {
        columns: columns.into_iter().map(|(_, name)| name).collect(),
        rows,
    })
}

/// True when every non-blank cell equals the header cell above it.
fn repeats_header(header: &[String], cells: &[String]) -> bool {
    let mut matched = 0;
    for (idx, cell) in cells.iter().enumerate() {
        if cell.is_empty() {
            continue;
        }
        match header.get(idx) {
            Some(name) if name.eq_ignore_ascii_case(cell) => matched += 1,
            _ => return false,
        }
    }
    matched > 0
}
