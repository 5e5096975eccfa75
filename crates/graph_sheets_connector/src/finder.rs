//! Locating workbooks from user input: drive paths, site paths, sharing
//! links, or free-text search.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::api::Api;
use crate::batch::BatchItem;
use crate::errors::{Result, SheetsError};
use crate::http::HttpClient;
use crate::models::{DriveItem, File, ListResponse, XLSX_MIME_TYPE};
use crate::req::encode_uri_component;

// Relative or absolute path with at least two segments.
static FILE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(/?[^/]+)?(/[^/]+)+$").unwrap());
static DRIVE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^drive://([^/]+)/(.+)$").unwrap());
static SITE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^site://([^/]+)/(.+)$").unwrap());
static XLSX_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\.xlsx$").unwrap());

const SEARCH_SELECT: &str = "id,name,file,parentReference";
const SEARCH_LIMIT_PER_REQUEST: &str = "50";

pub struct WorkbooksFinder<'a, C: HttpClient> {
    api: &'a Api<C>,
}

impl<'a, C: HttpClient> WorkbooksFinder<'a, C> {
    pub fn new(api: &'a Api<C>) -> Self {
        WorkbooksFinder { api }
    }

    /// Find workbooks matching `input`, which may be a path in the personal
    /// drive (`/path/to/file.xlsx`), a drive path (`drive://<id>/<path>`), a
    /// site path (`site://<name>/<path>`), a sharing URL, or free text.
    ///
    /// A path that resolves to nothing yields an empty result, not an error.
    pub async fn search(&self, input: &str) -> Result<Vec<File>> {
        match self.dispatch(input).await {
            Err(SheetsError::ResourceNotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn dispatch(&self, input: &str) -> Result<Vec<File>> {
        if FILE_PATH_RE.is_match(input) {
            info!(path = input, "searching personal drive by path");
            self.by_path_in_drive("/me/drive", input, &["my".to_string()])
                .await
        } else if let Some(caps) = DRIVE_PATH_RE.captures(input) {
            info!(path = input, "searching drive by path");
            let prefix = format!("/drives/{}", encode_uri_component(&caps[1]));
            self.by_path_in_drive(&prefix, &caps[2], &[]).await
        } else if let Some(caps) = SITE_PATH_RE.captures(input) {
            info!(path = input, "searching site by path");
            self.by_path_in_site(&caps[1], &caps[2]).await
        } else if input.starts_with("https://") {
            info!("searching by sharing link");
            self.by_sharing_url(input).await
        } else {
            info!(text = input, "searching by text");
            self.by_text(input).await
        }
    }

    async fn by_path_in_site(&self, site_name: &str, path: &str) -> Result<Vec<File>> {
        let site = self.api.site(site_name).await?;
        let prefix = format!("/sites/{}/drive", encode_uri_component(&site.id));
        let path_prefix = ["sites".to_string(), site_name.to_string()];
        self.by_path_in_drive(&prefix, path, &path_prefix).await
    }

    async fn by_path_in_drive(
        &self,
        drive_prefix: &str,
        path: &str,
        path_prefix: &[String],
    ) -> Result<Vec<File>> {
        let path = path.trim_matches('/');
        let path = if path.is_empty() {
            "/".to_string()
        } else {
            format!(":/{path}:/")
        };
        let uri = format!("{drive_prefix}/root{path}?$select=id,name,parentReference,file");

        let response = self.api.client().get(&uri, &[], &[]).await?;
        let item: DriveItem = response.json()?;
        check_mime_type(&item)?;
        Ok(vec![File::from_drive_item(&item, path_prefix)?])
    }

    async fn by_sharing_url(&self, url: &str) -> Result<Vec<File>> {
        // Sharing URLs are looked up by their base64url token.
        let sharing_id = format!("u!{}", URL_SAFE_NO_PAD.encode(url));
        let uri = format!("/shares/{sharing_id}/driveItem");

        let response = match self.api.client().get(&uri, &[], &[]).await {
            Ok(response) => response,
            Err(err) => return Err(share_link_error(url, err)),
        };
        let item: DriveItem = response.json()?;
        check_mime_type(&item)?;
        Ok(vec![File::from_drive_item(&item, &[])?])
    }

    async fn by_text(&self, search: &str) -> Result<Vec<File>> {
        let search = XLSX_SUFFIX_RE.replace(search.trim(), "").to_string();

        let mut batch = self.api.batch::<File>(None);

        // Personal OneDrive.
        batch.add(
            BatchItem::get("/me/drive/root/search(q='{search}')?$select={select}&$top={limit}")
                .arg("search", &search)
                .arg("select", SEARCH_SELECT)
                .arg("limit", SEARCH_LIMIT_PER_REQUEST)
                .map(map_to_files(vec!["my".to_string()], search.clone())),
        );

        // Files shared with the account.
        batch.add(
            BatchItem::get("/me/drive/sharedWithMe?$select={select}&$top={limit}")
                .arg("select", SEARCH_SELECT)
                .arg("limit", SEARCH_LIMIT_PER_REQUEST)
                .map(map_to_files(vec!["shared".to_string()], search.clone())),
        );

        // Every site document library.
        for drive in self.api.sites_drives().await? {
            batch.add(
                BatchItem::get("/drives/{driveId}/search(q='{search}')?$top={limit}")
                    .arg("driveId", &drive.id)
                    .arg("search", &search)
                    .arg("limit", SEARCH_LIMIT_PER_REQUEST)
                    .map(map_to_files(drive.path.clone(), search.clone())),
            );
        }

        batch.execute().collect().await
    }
}

/// Mapper for search listings: keep XLSX files whose name contains the
/// searched string.
fn map_to_files(
    path: Vec<String>,
    search: String,
) -> impl FnMut(&Value) -> Result<Vec<File>> + Send + 'static {
    move |body| {
        let list: ListResponse<DriveItem> = serde_json::from_value(body.clone())?;
        let mut out = Vec::new();
        for item in &list.value {
            if mime_type(item) != Some(XLSX_MIME_TYPE) {
                continue;
            }
            if !search.is_empty() && !item.name.contains(search.as_str()) {
                continue;
            }
            out.push(File::from_drive_item(item, &path)?);
        }
        Ok(out)
    }
}

fn mime_type(item: &DriveItem) -> Option<&str> {
    item.file.as_ref().and_then(|f| f.mime_type.as_deref())
}

fn check_mime_type(item: &DriveItem) -> Result<()> {
    let mime = mime_type(item).unwrap_or_default();
    if mime != XLSX_MIME_TYPE {
        return Err(SheetsError::InvalidFileType(format!(
            "File is not in the \"XLSX\" Excel format. Mime type: \"{mime}\""
        )));
    }
    Ok(())
}

/// Turn share-lookup failures into actionable messages; anything not
/// share-specific passes through.
fn share_link_error(url: &str, err: SheetsError) -> SheetsError {
    let prefix: String = url.chars().take(32).collect();
    match &err {
        SheetsError::AccessDenied(_) => SheetsError::ShareLink(format!(
            "The sharing link \"{prefix}...\" no exists, or you do not have permission to access it."
        )),
        SheetsError::BadRequest(message)
            if message == "InvalidRequest: The sharing token is invalid." =>
        {
            SheetsError::ShareLink(format!("The sharing link \"{prefix}...\" is invalid."))
        }
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::ApiBuilder;
    use crate::http::testutil::MockClient;

    fn api(mock: MockClient) -> Api<MockClient> {
        ApiBuilder::new("token")
            .max_attempts(1)
            .with_client(mock)
            .unwrap()
    }

    fn xlsx_item(id: &str, name: &str, drive_id: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "file": {"mimeType": XLSX_MIME_TYPE},
            "parentReference": {"driveId": drive_id, "path": "/drive/root:"},
        })
    }

    #[test]
    fn input_classification() {
        assert!(FILE_PATH_RE.is_match("/path/to/file.xlsx"));
        assert!(FILE_PATH_RE.is_match("path/to/file.xlsx"));
        assert!(!FILE_PATH_RE.is_match("file.xlsx"));
        assert!(!FILE_PATH_RE.is_match("drive://abc/file.xlsx"));
        assert!(!FILE_PATH_RE.is_match("https://example.com/x"));
        assert!(DRIVE_PATH_RE.is_match("drive://abc123/path/file.xlsx"));
        assert!(SITE_PATH_RE.is_match("site://Excel Sheets/path/file.xlsx"));
    }

    #[tokio::test]
    async fn finds_file_by_path_in_personal_drive() {
        logutil::init_test();
        let mock = MockClient::new();
        mock.push_response(200, xlsx_item("f1", "report.xlsx", "d1"));
        let api = api(mock);

        let files = WorkbooksFinder::new(&api)
            .search("/folder/report.xlsx")
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "f1");
        assert_eq!(files[0].path, ["my"]);

        let urls = api.client().client().request_urls();
        assert!(
            urls[0].contains("/me/drive/root:/folder/report.xlsx:/"),
            "{}",
            urls[0]
        );
    }

    #[tokio::test]
    async fn finds_file_by_drive_path() {
        let mock = MockClient::new();
        mock.push_response(200, xlsx_item("f1", "report.xlsx", "d9"));
        let api = api(mock);

        let files = WorkbooksFinder::new(&api)
            .search("drive://d9/sub/report.xlsx")
            .await
            .unwrap();
        assert_eq!(files[0].drive_id, "d9");

        let urls = api.client().client().request_urls();
        assert!(
            urls[0].contains("/drives/d9/root:/sub/report.xlsx:/"),
            "{}",
            urls[0]
        );
    }

    #[tokio::test]
    async fn finds_file_by_site_path() {
        let mock = MockClient::new();
        mock.push_response(
            200,
            json!({"value": [{"id": "s1,g1", "name": "Excel Sheets"}]}),
        );
        mock.push_response(200, xlsx_item("f1", "report.xlsx", "d1"));
        let api = api(mock);

        let files = WorkbooksFinder::new(&api)
            .search("site://Excel Sheets/report.xlsx")
            .await
            .unwrap();
        assert_eq!(files[0].path, ["sites", "Excel Sheets"]);

        let urls = api.client().client().request_urls();
        assert!(
            urls[1].contains("/sites/s1%2Cg1/drive/root:/report.xlsx:/"),
            "{}",
            urls[1]
        );
    }

    #[tokio::test]
    async fn missing_path_yields_empty_result() {
        let mock = MockClient::new();
        mock.push_response(
            404,
            json!({"error": {"code": "itemNotFound", "message": "not found"}}),
        );
        let api = api(mock);

        let files = WorkbooksFinder::new(&api)
            .search("/no/such/file.xlsx")
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn rejects_non_xlsx_file() {
        let mock = MockClient::new();
        mock.push_response(
            200,
            json!({
                "id": "f1",
                "name": "doc.docx",
                "file": {"mimeType": "application/msword"},
                "parentReference": {"driveId": "d1"},
            }),
        );
        let api = api(mock);

        let err = WorkbooksFinder::new(&api)
            .search("/folder/doc.docx")
            .await
            .unwrap_err();
        assert!(matches!(err, SheetsError::InvalidFileType(_)), "{err:?}");
    }

    #[tokio::test]
    async fn resolves_sharing_url() {
        let mock = MockClient::new();
        mock.push_response(200, xlsx_item("f1", "shared.xlsx", "d1"));
        let api = api(mock);

        let url = "https://example.sharepoint.com/:x:/g/abc";
        let files = WorkbooksFinder::new(&api).search(url).await.unwrap();
        assert_eq!(files[0].file_id, "f1");

        let request_url = &api.client().client().request_urls()[0];
        let expected_id = format!("u!{}", URL_SAFE_NO_PAD.encode(url));
        assert!(request_url.contains(&expected_id), "{request_url}");
    }

    #[tokio::test]
    async fn denied_sharing_url_maps_to_share_link_error() {
        let mock = MockClient::new();
        mock.push_response(
            403,
            json!({"error": {
                "code": "accessDenied",
                "message": "The sharing link no longer exists.",
            }}),
        );
        let api = api(mock);

        let err = WorkbooksFinder::new(&api)
            .search("https://example.sharepoint.com/:x:/g/abc")
            .await
            .unwrap_err();
        assert!(matches!(err, SheetsError::ShareLink(_)), "{err:?}");
    }

    #[tokio::test]
    async fn invalid_sharing_token_maps_to_share_link_error() {
        let mock = MockClient::new();
        mock.push_response(
            400,
            json!({"error": {
                "code": "invalidRequest",
                "message": "The sharing token is invalid.",
            }}),
        );
        let api = api(mock);

        let err = WorkbooksFinder::new(&api)
            .search("https://example.sharepoint.com/:x:/g/abc")
            .await
            .unwrap_err();
        match err {
            SheetsError::ShareLink(message) => {
                assert!(message.ends_with("is invalid."), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_search_spans_personal_shared_and_site_drives() {
        let mock = MockClient::new();
        // Site listing plus its drives, for the site-wide search targets.
        mock.push_response(
            200,
            json!({"value": [{"id": "host,guid", "name": "Team"}]}),
        );
        mock.push_response(
            200,
            json!({"responses": [
                {"id": "1", "status": 200, "body": {"value": [
                    {"id": "drv-1", "name": "Documents"},
                ]}},
            ]}),
        );
        // The search batch itself: personal, shared, one site drive.
        mock.push_response(
            200,
            json!({"responses": [
                {"id": "1", "status": 200, "body": {"value": [
                    xlsx_item("f1", "sales.xlsx", "d1"),
                    {
                        "id": "f2",
                        "name": "sales.csv",
                        "file": {"mimeType": "text/csv"},
                        "parentReference": {"driveId": "d1"},
                    },
                ]}},
                {"id": "2", "status": 200, "body": {"value": [
                    xlsx_item("f3", "unrelated.xlsx", "d2"),
                ]}},
                {"id": "3", "status": 200, "body": {"value": [
                    xlsx_item("f4", "sales-2026.xlsx", "drv-1"),
                ]}},
            ]}),
        );
        let api = api(mock);

        let files = WorkbooksFinder::new(&api).search("sales.xlsx").await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        // ".xlsx" is stripped before matching, so "sales-2026.xlsx" matches
        // too; the csv and the non-matching name are skipped.
        assert_eq!(ids, ["f1", "f4"]);

        let requests = api.client().client().requests();
        let search_batch: Value =
            serde_json::from_slice(requests[2].body.as_ref().unwrap()).unwrap();
        let sub_requests = search_batch["requests"].as_array().unwrap();
        assert_eq!(sub_requests.len(), 3);
        assert!(
            sub_requests[0]["url"]
                .as_str()
                .unwrap()
                .contains("search(q='sales')"),
            "{}",
            sub_requests[0]["url"]
        );
        assert!(
            sub_requests[1]["url"]
                .as_str()
                .unwrap()
                .contains("sharedWithMe"),
        );
        assert!(
            sub_requests[2]["url"]
                .as_str()
                .unwrap()
                .starts_with("/drives/drv-1/search"),
        );
    }
}
