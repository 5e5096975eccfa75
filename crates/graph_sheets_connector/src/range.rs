//! Range addresses (`Sheet1!B2:I40`) and the row-band splitting used to keep
//! bulk reads under the API cell ceiling. Pure, no I/O.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{Result, SheetsError};

// The service may prefix a sheet name and a stray '!'; only the trailing
// address matters. Rows may be absent ("A:C") and default to 0.
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?([A-Z]+)([0-9]+)?(?::([A-Z]+)([0-9]+)?)?$").unwrap());

/// 1-based base-26 value of a column's letters (`A` -> 1, `Z` -> 26, `AA` -> 27).
pub(crate) fn column_to_int(column: &str) -> u32 {
    column
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + (b - b'A' + 1) as u32)
}

pub(crate) fn columns_between(start: &str, end: &str) -> u32 {
    column_to_int(end) - column_to_int(start) + 1
}

/// A rectangular worksheet range with 1-indexed rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRange {
    start_column: String,
    end_column: String,
    first_row: u32,
    last_row: u32,
}

impl TableRange {
    /// Parse the trailing address out of an API-returned string.
    pub fn from_address(address: &str) -> Result<Self> {
        let caps = ADDRESS_RE
            .captures(address)
            .ok_or_else(|| SheetsError::MalformedAddress(address.to_string()))?;

        let start_column = caps[1].to_string();
        let first_row = match caps.get(2) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| SheetsError::MalformedAddress(address.to_string()))?,
            None => 0,
        };
        let end_column = match caps.get(3) {
            Some(m) => m.as_str().to_string(),
            None => start_column.clone(),
        };
        let last_row = match caps.get(4) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| SheetsError::MalformedAddress(address.to_string()))?,
            None => first_row,
        };

        // Descending ranges never come back from the service; treat them as
        // malformed rather than letting the span math underflow.
        if column_to_int(&start_column) > column_to_int(&end_column) || first_row > last_row {
            return Err(SheetsError::MalformedAddress(address.to_string()));
        }

        Ok(TableRange {
            start_column,
            end_column,
            first_row,
            last_row,
        })
    }

    pub fn start_column(&self) -> &str {
        &self.start_column
    }

    pub fn end_column(&self) -> &str {
        &self.end_column
    }

    pub fn first_row(&self) -> u32 {
        self.first_row
    }

    pub fn last_row(&self) -> u32 {
        self.last_row
    }

    pub fn start_cell(&self) -> String {
        format!("{}{}", self.start_column, self.first_row)
    }

    pub fn end_cell(&self) -> String {
        format!("{}{}", self.end_column, self.last_row)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.start_cell(), self.end_cell())
    }

    pub fn column_count(&self) -> u32 {
        columns_between(&self.start_column, &self.end_column)
    }

    pub fn row_count(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    /// Drop the first `skip` rows. `None` when no rows remain.
    pub fn skip_rows(&self, skip: u32) -> Option<TableRange> {
        let first_row = self.first_row + skip;
        if first_row > self.last_row {
            return None;
        }
        Some(TableRange {
            start_column: self.start_column.clone(),
            end_column: self.end_column.clone(),
            first_row,
            last_row: self.last_row,
        })
    }

    /// Break the range into consecutive row bands sized to stay under
    /// `cells_per_bulk` cells, clamped to `rows_limit` rows when given.
    ///
    /// Bands are contiguous and non-overlapping, and cover the clamped range
    /// exactly. A single row wider than the ceiling still gets a band of its
    /// own (one row per band is the floor).
    pub fn split(&self, cells_per_bulk: u32, rows_limit: Option<u32>) -> RangeSplit {
        let rows_per_bulk = (cells_per_bulk / self.column_count()).max(1);
        let end_row = match rows_limit {
            Some(limit) => self
                .first_row
                .saturating_add(limit)
                .saturating_sub(1)
                .min(self.last_row),
            None => self.last_row,
        };
        RangeSplit {
            start_column: self.start_column.clone(),
            end_column: self.end_column.clone(),
            next_row: self.first_row,
            end_row,
            rows_per_bulk,
        }
    }
}

impl fmt::Display for TableRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Iterator over the row bands of [`TableRange::split`].
#[derive(Debug, Clone)]
pub struct RangeSplit {
    start_column: String,
    end_column: String,
    next_row: u32,
    end_row: u32,
    rows_per_bulk: u32,
}

impl RangeSplit {
    /// A split that yields nothing, for ranges with no body rows.
    pub(crate) fn empty() -> Self {
        RangeSplit {
            start_column: String::new(),
            end_column: String::new(),
            next_row: 1,
            end_row: 0,
            rows_per_bulk: 1,
        }
    }
}

impl Iterator for RangeSplit {
    type Item = TableRange;

    fn next(&mut self) -> Option<TableRange> {
        if self.next_row > self.end_row {
            return None;
        }
        let band_end = self
            .next_row
            .saturating_add(self.rows_per_bulk - 1)
            .min(self.end_row);
        let band = TableRange {
            start_column: self.start_column.clone(),
            end_column: self.end_column.clone(),
            first_row: self.next_row,
            last_row: band_end,
        };
        self.next_row = band_end + 1;
        Some(band)
    }
}
