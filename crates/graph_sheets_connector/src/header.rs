//! Header row parsing and column-name normalization.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::errors::Result;
use crate::range::TableRange;

/// The header row of a worksheet: its range and the deduplicated,
/// ASCII-normalized column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    range: TableRange,
    columns: Vec<String>,
}

impl TableHeader {
    /// Build a header from the row's address and its cell text.
    ///
    /// A single-column address is what the service returns for an empty
    /// sheet; the one placeholder cell it carries is not a column.
    pub fn from_address(address: &str, cells: &[String]) -> Result<Self> {
        let range = TableRange::from_address(address)?;
        let columns = if range.start_column() == range.end_column() {
            Vec::new()
        } else {
            parse_columns(cells)
        };
        Ok(TableHeader { range, columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn start_cell(&self) -> String {
        self.range.start_cell()
    }

    pub fn end_cell(&self) -> String {
        self.range.end_cell()
    }

    /// Rows occupied by the header; the body range starts below them.
    pub fn row_count(&self) -> u32 {
        self.range.row_count()
    }
}

/// Normalize and deduplicate raw header cells in order.
pub(crate) fn parse_columns(cells: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(cells.len());
    for (index, cell) in cells.iter().enumerate() {
        let mut name = normalize_column_name(cell);
        if name.is_empty() {
            name = format!("column-{}", index + 1);
        }

        // Numeric suffix on collision; the suffixed name must not collide
        // with names already emitted either.
        let base = name.clone();
        let mut i = 1;
        while out.contains(&name) {
            name = format!("{base}-{i}");
            i += 1;
        }

        out.push(name);
    }
    out
}

/// Transliterate to ASCII (NFKD, combining marks dropped), then collapse
/// every run outside `[A-Za-z0-9.-]` to a single `_`, trimming the ends.
pub(crate) fn normalize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch);
        } else {
            pending_separator = true;
        }
    }
    out
}
