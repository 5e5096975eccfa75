//! Access layer for reading tabular data out of spreadsheets hosted behind a
//! Graph-compatible API.
//!
//! The entry point is [`Api`], built through [`ApiBuilder`]. It locates
//! workbooks ([`WorkbooksFinder`]), lists worksheets with parsed headers, and
//! streams worksheet bodies row by row ([`SheetContent`]), batching
//! independent calls and retrying transient failures along the way.

mod api;
mod batch;
mod content;
mod finder;
mod header;
mod models;
mod range;
mod req;
mod retry;

pub mod errors;
pub mod http;

pub use api::{Api, ApiBuilder, DEFAULT_CELLS_PER_BULK};
pub use batch::{BatchItem, BatchItemId, BatchRequest, BatchResults, MAX_REQUESTS_PER_BATCH};
pub use content::{RowStream, SheetContent};
pub use errors::{Result, SheetsError};
pub use finder::WorkbooksFinder;
pub use header::TableHeader;
pub use models::{Drive, File, Site, Worksheet, XLSX_MIME_TYPE};
pub use range::{RangeSplit, TableRange};
pub use req::{DEFAULT_BASE_URL, GraphClient};
pub use retry::{RETRY_MAX_ATTEMPTS, RETRY_SYNC_MAX_ATTEMPTS, RetryPolicy};
