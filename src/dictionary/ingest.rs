//! Tabular input and output.
//!
//! Spreadsheets (`.xlsx`, `.xlsm`, `.xls`, `.ods`) are read with `calamine`,
//! every sheet in order. Anything else is treated as tab-delimited text with
//! ragged rows allowed. Raw game exports are read without quoting since their
//! strings carry bare quotes; files written by [`write_tsv`] need
//! [`read_rows_with`] and `quoted = true` to read back.
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use tracing::{debug, info};

use super::TextPair;
use crate::config::ColumnConfig;
use crate::error::{EngineError, Result};
use crate::normalize::clean;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Pairs read from a table, with the rows that could not be used.
#[derive(Debug, Default)]
pub struct Ingested {
    pub pairs: Vec<TextPair>,
    /// Data rows examined (header excluded).
    pub rows: usize,
    /// Rows with a missing or empty source cell.
    pub skipped: usize,
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

/// Read every row of `path` as strings. Headers are not stripped.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    read_rows_with(path, false)
}

/// Like [`read_rows`], with CSV-style quoting of delimited text when
/// `quoted` is set. Spreadsheets ignore the flag.
pub fn read_rows_with(path: &Path, quoted: bool) -> Result<Vec<Vec<String>>> {
    if !path.exists() {
        return Err(EngineError::InvalidInput(format!(
            "input file not found: {}",
            path.display()
        )));
    }
    let rows = if is_spreadsheet(path) {
        read_spreadsheet(path)?
    } else {
        read_delimited(path, quoted)?
    };
    info!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn read_spreadsheet(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        EngineError::InvalidInput(format!("cannot open {}: {e}", path.display()))
    })?;

    let mut rows = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = workbook.worksheet_range(&sheet).map_err(|e| {
            EngineError::InvalidInput(format!("cannot read sheet {sheet:?}: {e}"))
        })?;
        debug!("Sheet {sheet:?}: {} rows", range.height());
        rows.extend(
            range
                .rows()
                .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>()),
        );
    }
    Ok(rows)
}

fn read_delimited(path: &Path, quoted: bool) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(quoted)
        .from_path(path)
        .map_err(|e| EngineError::InvalidInput(format!("cannot open {}: {e}", path.display())))?;

    let mut rows = Vec::new();
    for (n, record) in reader.byte_records().enumerate() {
        let record = record
            .map_err(|e| EngineError::InvalidInput(format!("line {}: {e}", n + 1)))?;
        rows.push(
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        );
    }
    Ok(rows)
}

/// Render a spreadsheet cell the way it displays: integral floats lose
/// their fractional part, empty cells become empty strings.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Turn raw rows into source/target pairs using `columns`.
#[must_use]
pub fn pairs_from_rows(rows: &[Vec<String>], columns: ColumnConfig) -> Ingested {
    let mut ingested = Ingested::default();
    let body = if columns.has_header {
        rows.get(1..).unwrap_or_default()
    } else {
        rows
    };

    for (n, row) in body.iter().enumerate() {
        ingested.rows += 1;
        let source = row.get(columns.source).map(clean).unwrap_or_default();
        if source.is_empty() {
            debug!("Row {}: missing source, skipped", n + 1);
            ingested.skipped += 1;
            continue;
        }
        let target = row.get(columns.target).map(clean).unwrap_or_default();
        ingested.pairs.push(TextPair { source, target });
    }
    ingested
}

/// Read a table and extract its (source, target) pairs.
pub fn read_pairs(path: &Path, columns: ColumnConfig) -> Result<Ingested> {
    let rows = read_rows(path)?;
    Ok(pairs_from_rows(&rows, columns))
}

/// Write rows as tab-separated values. Cells holding tabs, newlines or
/// quotes are quoted, so the output reads back with [`read_rows_with`] and
/// `quoted = true`, not with [`read_rows`].
pub fn write_tsv(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_path(path)
        .map_err(|e| EngineError::InvalidInput(format!("cannot create {}: {e}", path.display())))?;

    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| EngineError::InvalidInput(format!("write failed: {e}")))?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
