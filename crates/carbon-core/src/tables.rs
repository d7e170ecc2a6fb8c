//! CSV reading for the static lookup tables.
//!
//! Tables carry a header row; `#` comment lines and blank records are
//! skipped and every field is trimmed. Header names are matched case-insensitively.

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::error::TableError;
use crate::ClassCode;

#[derive(Debug, Clone)]
pub struct CsvRow {
    /// 1-based line the record starts on.
    pub line: usize,
    fields: StringRecord,
}

impl CsvRow {
    /// Field at `idx`; empty when the row is short.
    pub fn get(&self, idx: usize) -> &str {
        self.fields.get(idx).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct CsvTable {
    pub name: String,
    headers: StringRecord,
    pub rows: Vec<CsvRow>,
}

impl CsvTable {
    pub fn parse(name: &str, text: &str) -> Result<Self, TableError> {
        let parse_error = |err: csv::Error| TableError::Parse {
            table: name.to_string(),
            line: err.position().map_or(0, |p| p.line() as usize),
            message: err.to_string(),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(Trim::All)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

        let headers = reader.headers().map_err(parse_error)?.clone();
        let mut rows = Vec::new();
        for result in reader.records() {
            let fields = result.map_err(parse_error)?;
            if fields.iter().all(str::is_empty) {
                continue;
            }
            let line = fields.position().map_or(0, |p| p.line() as usize);
            rows.push(CsvRow { line, fields });
        }
        Ok(Self {
            name: name.to_string(),
            headers,
            rows,
        })
    }

    /// Index of the first header matching any of `names`.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|n| self.headers.iter().position(|h| h.eq_ignore_ascii_case(n)))
    }

    /// Like [`column`](Self::column) but missing is an error naming the first alias.
    pub fn require(&self, names: &[&str]) -> Result<usize, TableError> {
        self.column(names).ok_or_else(|| TableError::MissingColumn {
            table: self.name.clone(),
            column: names.first().copied().unwrap_or_default().to_string(),
        })
    }

    pub fn error(&self, row: &CsvRow, message: impl Into<String>) -> TableError {
        TableError::Parse {
            table: self.name.clone(),
            line: row.line,
            message: message.into(),
        }
    }
}

/// Split a `;`-separated multi-value cell. An empty cell yields no values.
pub fn explode_list(cell: &str) -> Vec<String> {
    cell.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Parse a class cell: `16`, `16: Cultivated and managed land`, or a range
/// such as `20 - 23: Water, snow and ice;artificial surfaces`.
pub fn parse_class_cell(cell: &str) -> Option<Vec<ClassCode>> {
    let head = cell.split(':').next()?.trim();
    if head.is_empty() {
        return None;
    }
    match head.split_once('-') {
        Some((lo, hi)) => {
            let lo: ClassCode = lo.trim().parse().ok()?;
            let hi: ClassCode = hi.trim().parse().ok()?;
            (lo <= hi).then(|| (lo..=hi).collect())
        }
        None => head.parse().ok().map(|c| vec![c]),
    }
}
