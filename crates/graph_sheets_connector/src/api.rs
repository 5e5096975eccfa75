//! High-level workbook access: sessions, worksheet listing, header parsing,
//! and streaming sheet content.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::LOCATION;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use url::Url;

use crate::batch::{BatchItem, BatchRequest};
use crate::content::{RowStream, SheetContent};
use crate::errors::{Result, SheetsError};
use crate::finder::WorkbooksFinder;
use crate::header::TableHeader;
use crate::http::{HttpClient, ReqwestClient};
use crate::models::{
    Drive, DriveInfo, File, ListResponse, RangeBody, Site, Worksheet, WorksheetInfo,
};
use crate::range::TableRange;
use crate::req::{DEFAULT_BASE_URL, GraphClient, SESSION_ID_HEADER, replace_params_in_uri};
use crate::retry::{RETRY_MAX_ATTEMPTS, RetryPolicy};

/// Cell ceiling for a single range read. Larger bodies are split into row
/// bands under this many cells each.
pub const DEFAULT_CELLS_PER_BULK: u32 = 1_000_000;

const WORKSHEET_ENDPOINT: &str =
    "/drives/{driveId}/items/{fileId}/workbook/worksheets/{worksheetId}";
const WORKSHEETS_ENDPOINT: &str =
    "/drives/{driveId}/items/{fileId}/workbook/worksheets?$select=id,position,name,visibility";
const WORKSHEET_IDS_ENDPOINT: &str =
    "/drives/{driveId}/items/{fileId}/workbook/worksheets?$select=id,name,position";
const SESSION_ENDPOINT: &str = "/drives/{driveId}/items/{fileId}/workbook/createSession";
// valuesOnly so a stray format-only cell doesn't widen the range.
const USED_RANGE_ENDPOINT: &str = "/usedRange(valuesOnly=true)?$select=address";
const HEADER_ROW_ENDPOINT: &str = "/usedRange(valuesOnly=true)/row(row=0)?$select=address,text";

const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SESSION_POLL_MAX_ATTEMPTS: usize = 150;

#[derive(Debug, Deserialize)]
struct SessionBody {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPollBody {
    status: String,
    resource_location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiBuilder {
    access_token: String,
    base_url: String,
    max_attempts: usize,
    cells_per_bulk: u32,
    session_poll_interval: Duration,
}

impl ApiBuilder {
    pub fn new(access_token: impl Into<String>) -> Self {
        ApiBuilder {
            access_token: access_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_attempts: RETRY_MAX_ATTEMPTS,
            cells_per_bulk: DEFAULT_CELLS_PER_BULK,
            session_poll_interval: SESSION_POLL_INTERVAL,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn cells_per_bulk(mut self, cells_per_bulk: u32) -> Self {
        self.cells_per_bulk = cells_per_bulk.max(1);
        self
    }

    pub fn session_poll_interval(mut self, interval: Duration) -> Self {
        self.session_poll_interval = interval;
        self
    }

    pub fn build(self) -> Result<Api<ReqwestClient>> {
        let client = ReqwestClient::new()?;
        self.with_client(client)
    }

    /// Build against a custom transport.
    pub fn with_client<C: HttpClient>(self, client: C) -> Result<Api<C>> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| SheetsError::UrlParse(format!("{e}: \"{}\"", self.base_url)))?;
        Ok(Api {
            client: GraphClient::new(
                client,
                base_url,
                self.access_token,
                RetryPolicy::new(self.max_attempts),
            ),
            cells_per_bulk: self.cells_per_bulk,
            session_poll_interval: self.session_poll_interval,
        })
    }
}

/// Entry point for reading workbooks through a Graph-compatible backend.
#[derive(Debug)]
pub struct Api<C: HttpClient> {
    client: GraphClient<C>,
    cells_per_bulk: u32,
    session_poll_interval: Duration,
}

impl Api<ReqwestClient> {
    pub fn builder(access_token: impl Into<String>) -> ApiBuilder {
        ApiBuilder::new(access_token)
    }
}

impl<C: HttpClient> Api<C> {
    pub fn client(&self) -> &GraphClient<C> {
        &self.client
    }

    /// Start a batch of independent calls.
    pub fn batch<T>(&self, limit: Option<usize>) -> BatchRequest<'_, C, T> {
        BatchRequest::new(&self.client, limit)
    }

    /// Try to open a non-persisting workbook session.
    ///
    /// A session pins reads of a busy workbook to one consistent snapshot,
    /// but reads work without one, so every failure mode here degrades to
    /// `None` instead of surfacing.
    pub async fn create_workbook_session(&self, drive_id: &str, file_id: &str) -> Option<String> {
        match self.try_create_session(drive_id, file_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(%err, "could not create workbook session, continuing without one");
                None
            }
        }
    }

    async fn try_create_session(&self, drive_id: &str, file_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(
                SESSION_ENDPOINT,
                &[("driveId", drive_id), ("fileId", file_id)],
                Some(&json!({"persistChanges": false})),
                &[("Prefer", "respond-async")],
            )
            .await?;

        match response.status.as_u16() {
            // Created synchronously.
            201 => {
                let body: SessionBody = response.json()?;
                Ok(body.id)
            }
            // Accepted: poll the operation at the Location URL.
            202 => {
                let Some(location) = response
                    .headers
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                else {
                    return Ok(None);
                };
                self.poll_session(&location).await
            }
            _ => Ok(None),
        }
    }

    async fn poll_session(&self, location: &str) -> Result<Option<String>> {
        for _ in 0..SESSION_POLL_MAX_ATTEMPTS {
            tokio::time::sleep(self.session_poll_interval).await;
            let response = self.client.get(location, &[], &[]).await?;
            let body: SessionPollBody = response.json()?;
            match body.status.as_str() {
                "running" | "notStarted" => continue,
                "succeeded" => {
                    let Some(resource) = body.resource_location else {
                        return Ok(None);
                    };
                    let response = self.client.get(&resource, &[], &[]).await?;
                    let body: SessionBody = response.json()?;
                    return Ok(body.id);
                }
                other => {
                    warn!(status = other, "workbook session creation did not succeed");
                    return Ok(None);
                }
            }
        }
        warn!("gave up waiting for workbook session creation");
        Ok(None)
    }

    /// The worksheet's used range (the bounding box of non-empty cells).
    pub async fn used_range(
        &self,
        drive_id: &str,
        file_id: &str,
        worksheet_id: &str,
        session: Option<&str>,
    ) -> Result<TableRange> {
        let uri = format!(
            "{}{USED_RANGE_ENDPOINT}",
            self.worksheet_uri(drive_id, file_id, worksheet_id)
        );
        let response = self.client.get(&uri, &[], &session_headers(session)).await?;
        let body: RangeBody = response.json()?;
        TableRange::from_address(&body.address)
    }

    /// Read and parse the first used row as the header.
    pub async fn worksheet_header(
        &self,
        drive_id: &str,
        file_id: &str,
        worksheet_id: &str,
        session: Option<&str>,
    ) -> Result<TableHeader> {
        let uri = format!(
            "{}{HEADER_ROW_ENDPOINT}",
            self.worksheet_uri(drive_id, file_id, worksheet_id)
        );
        let response = self.client.get(&uri, &[], &session_headers(session)).await?;
        let body: RangeBody = response.json()?;
        let cells = body.text.into_iter().next().unwrap_or_default();
        let header = TableHeader::from_address(&body.address, &cells)?;
        info!(columns = %format_columns(header.columns()), "parsed header");
        Ok(header)
    }

    /// Open a worksheet for reading: header plus a lazy stream of body rows.
    ///
    /// A sheet whose header yields no columns is refused; a sheet whose used
    /// range is nothing but the header streams zero rows.
    pub async fn worksheet_content(
        &self,
        drive_id: &str,
        file_id: &str,
        worksheet_id: &str,
        rows_limit: Option<u32>,
    ) -> Result<SheetContent<'_, C>> {
        let session = self.create_workbook_session(drive_id, file_id).await;
        let session = session.as_deref();

        let used_range = self
            .used_range(drive_id, file_id, worksheet_id, session)
            .await?;
        info!(
            range = %used_range,
            columns = used_range.column_count(),
            rows = used_range.row_count(),
            "resolved used range",
        );

        let header = self
            .worksheet_header(drive_id, file_id, worksheet_id, session)
            .await?;
        if header.columns().is_empty() {
            return Err(SheetsError::EmptySheet("Spreadsheet is empty.".to_string()));
        }

        let rows = match used_range.skip_rows(header.row_count()) {
            None => RowStream::empty(),
            Some(body) => {
                let mut cells_per_bulk = self.cells_per_bulk;
                if let Some(limit) = rows_limit {
                    // No point requesting bands larger than the row limit.
                    cells_per_bulk =
                        cells_per_bulk.min(limit.saturating_mul(body.column_count()).max(1));
                }
                let session_headers = session
                    .map(|s| vec![(SESSION_ID_HEADER.to_string(), s.to_string())])
                    .unwrap_or_default();
                RowStream::new(
                    &self.client,
                    self.worksheet_uri(drive_id, file_id, worksheet_id),
                    session_headers,
                    body.split(cells_per_bulk, rows_limit),
                )
            }
        };

        Ok(SheetContent {
            header,
            used_range,
            rows,
        })
    }

    /// Resolve a worksheet id from its 0-based tab position.
    pub async fn worksheet_id_at(
        &self,
        drive_id: &str,
        file_id: &str,
        position: u32,
    ) -> Result<String> {
        let response = self
            .client
            .get(
                WORKSHEET_IDS_ENDPOINT,
                &[("driveId", drive_id), ("fileId", file_id)],
                &[],
            )
            .await?;
        let list: ListResponse<WorksheetInfo> = response.json()?;
        match list.value.into_iter().find(|info| info.position == position) {
            Some(info) => {
                info!(name = %info.name, position, "found worksheet");
                Ok(info.id)
            }
            None => Err(SheetsError::ResourceNotFound(format!(
                "No worksheet at position \"{position}\"."
            ))),
        }
    }

    /// List the workbook's worksheets with their parsed headers, sorted by
    /// tab position. Sheets whose header read comes back without an address
    /// have no readable content and are left out.
    pub async fn worksheets(&self, drive_id: &str, file_id: &str) -> Result<Vec<Worksheet>> {
        let session = self.create_workbook_session(drive_id, file_id).await;

        let response = self
            .client
            .get(
                WORKSHEETS_ENDPOINT,
                &[("driveId", drive_id), ("fileId", file_id)],
                &session_headers(session.as_deref()),
            )
            .await?;
        let list: ListResponse<WorksheetInfo> = response.json()?;

        // Header rows are independent reads, so fetch them in one batch.
        let mut batch = self.batch::<Worksheet>(None);
        for info in list.value {
            let sheet = Worksheet::from_info(info, drive_id, file_id);
            let uri = format!(
                "{}{HEADER_ROW_ENDPOINT}",
                self.worksheet_uri(drive_id, file_id, &sheet.worksheet_id)
            );
            batch.add(BatchItem::get(&uri).map(move |body| {
                let Some(address) = body.get("address").and_then(Value::as_str) else {
                    return Ok(vec![]);
                };
                let body: RangeBody = serde_json::from_value(body.clone())?;
                let cells = body.text.into_iter().next().unwrap_or_default();
                let mut sheet = sheet.clone();
                sheet.header = Some(TableHeader::from_address(address, &cells)?);
                Ok(vec![sheet])
            }));
        }
        let mut sheets = batch.execute().collect().await?;
        sheets.sort_by_key(|sheet| sheet.position);
        Ok(sheets)
    }

    /// Search sites the token can see.
    pub async fn sites(&self, search: &str) -> Result<Vec<Site>> {
        let response = self
            .client
            .get("/sites?search={search}&$select=id,name", &[("search", search)], &[])
            .await?;
        let list: ListResponse<Site> = response.json()?;
        Ok(list.value)
    }

    /// Resolve a site by name; the search must come back with exactly one.
    pub async fn site(&self, name: &str) -> Result<Site> {
        let mut sites = self.sites(name).await?;
        match sites.len() {
            0 => Err(SheetsError::ResourceNotFound(format!(
                "Site \"{name}\" not found."
            ))),
            1 => Ok(sites.remove(0)),
            _ => Err(SheetsError::UnexpectedCount(format!(
                "Multiple sites found when searching for \"{name}\"."
            ))),
        }
    }

    /// List the document libraries of every visible site.
    pub async fn sites_drives(&self) -> Result<Vec<Drive>> {
        let sites = self.sites("").await?;

        // Site search can return one site under several composite ids; the
        // segment before the first comma identifies the site host and is all
        // the drives endpoint needs.
        let mut seen = HashSet::new();
        let mut batch = self.batch::<Drive>(None);
        for site in sites {
            let site_id = site
                .id
                .split(',')
                .next()
                .unwrap_or(site.id.as_str())
                .to_string();
            if !seen.insert(site_id.clone()) {
                continue;
            }

            let name = site.name.clone();
            batch.add(
                BatchItem::get("/sites/{siteId}/drives?$select=id,name")
                    .arg("siteId", &site_id)
                    .map(move |body| {
                        let list: ListResponse<DriveInfo> = serde_json::from_value(body.clone())?;
                        list.value
                            .into_iter()
                            .map(|info| Drive::from_info(info, site.clone()))
                            .collect()
                    })
                    .on_error(move |err| {
                        warn!(%err, site = %name, "could not list site drives");
                    }),
            );
        }
        batch.execute().collect().await
    }

    /// Find workbooks matching `input`; see [`WorkbooksFinder::search`].
    pub async fn search_workbooks(&self, input: &str) -> Result<Vec<File>> {
        WorkbooksFinder::new(self).search(input).await
    }

    /// The signed-in account's principal name.
    pub async fn account_name(&self) -> Result<String> {
        let response = self
            .client
            .get("/me?$select=userPrincipalName", &[], &[])
            .await?;
        let body: Value = response.json()?;
        body.get("userPrincipalName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SheetsError::UnexpectedValue(
                    "Account response has no \"userPrincipalName\".".to_string(),
                )
            })
    }

    fn worksheet_uri(&self, drive_id: &str, file_id: &str, worksheet_id: &str) -> String {
        replace_params_in_uri(
            WORKSHEET_ENDPOINT,
            &[
                ("driveId", drive_id),
                ("fileId", file_id),
                ("worksheetId", worksheet_id),
            ],
        )
    }
}

fn session_headers(session: Option<&str>) -> Vec<(&str, &str)> {
    match session {
        Some(id) => vec![(SESSION_ID_HEADER, id)],
        None => Vec::new(),
    }
}

/// Log-friendly rendering of column names: each name truncated, long lists
/// elided.
fn format_columns(columns: &[String]) -> String {
    const MAX_ITEMS: usize = 20;
    const MAX_LEN: usize = 30;

    let mut parts: Vec<String> = columns
        .iter()
        .take(MAX_ITEMS)
        .map(|column| {
            if column.chars().count() > MAX_LEN {
                let truncated: String = column.chars().take(MAX_LEN).collect();
                format!("{truncated}...")
            } else {
                column.clone()
            }
        })
        .collect();
    if columns.len() > MAX_ITEMS {
        parts.push("...".to_string());
    }
    parts.join(", ")
}
