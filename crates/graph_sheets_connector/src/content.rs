//! Streaming the body of a worksheet as rows of cell text.

use std::collections::VecDeque;

use tracing::info;

use crate::errors::{Result, SheetsError};
use crate::header::TableHeader;
use crate::http::HttpClient;
use crate::models::RangeBody;
use crate::range::{RangeSplit, TableRange};
use crate::req::GraphClient;

const RANGE_ENDPOINT: &str = "/range(address='{address}')?$select=address,text";

/// The readable content of one worksheet: its parsed header plus a lazy
/// stream over the body rows.
#[derive(Debug)]
pub struct SheetContent<'a, C: HttpClient> {
    pub header: TableHeader,
    pub used_range: TableRange,
    pub rows: RowStream<'a, C>,
}

/// Lazy stream of body rows.
///
/// The body range is pre-split into row bands small enough to fetch in one
/// call each; a band is only requested once the previous one has been fully
/// consumed.
#[derive(Debug)]
pub struct RowStream<'a, C: HttpClient> {
    client: Option<&'a GraphClient<C>>,
    /// Worksheet endpoint with all ids already substituted.
    worksheet_uri: String,
    session_headers: Vec<(String, String)>,
    bands: RangeSplit,
    buffered: VecDeque<Vec<String>>,
    exported: u64,
    finished: bool,
}

impl<'a, C: HttpClient> RowStream<'a, C> {
    pub(crate) fn new(
        client: &'a GraphClient<C>,
        worksheet_uri: String,
        session_headers: Vec<(String, String)>,
        bands: RangeSplit,
    ) -> Self {
        RowStream {
            client: Some(client),
            worksheet_uri,
            session_headers,
            bands,
            buffered: VecDeque::new(),
            exported: 0,
            finished: false,
        }
    }

    /// A stream over a body with no rows.
    pub(crate) fn empty() -> Self {
        RowStream {
            client: None,
            worksheet_uri: String::new(),
            session_headers: Vec::new(),
            bands: RangeSplit::empty(),
            buffered: VecDeque::new(),
            exported: 0,
            finished: false,
        }
    }

    /// Read the next row. `Ok(None)` once the whole body has been exported.
    pub async fn read_next(&mut self) -> Result<Option<Vec<String>>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                self.exported += 1;
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }

            let Some(band) = self.bands.next() else {
                self.finished = true;
                info!(rows = self.exported, "exported all rows");
                return Ok(None);
            };
            self.fetch_band(&band).await?;
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<Vec<String>>> {
        let mut out = Vec::new();
        while let Some(row) = self.read_next().await? {
            out.push(row);
        }
        Ok(out)
    }

    async fn fetch_band(&mut self, band: &TableRange) -> Result<()> {
        let client = self.client.ok_or_else(|| {
            SheetsError::UnexpectedValue("Row stream has no client.".to_string())
        })?;

        let address = band.address();
        info!(range = %address, "exporting range");

        let uri = format!("{}{}", self.worksheet_uri, RANGE_ENDPOINT);
        let headers: Vec<(&str, &str)> = self
            .session_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let response = client
            .get(&uri, &[("address", address.as_str())], &headers)
            .await?;
        let body: RangeBody = response.json()?;

        // A range read is sized to fit in one response; a continuation link
        // here would mean silently dropped rows.
        if body.next_link.is_some() {
            return Err(SheetsError::UnexpectedPagination);
        }

        self.buffered.extend(body.text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::http::testutil::MockClient;
    use crate::req::DEFAULT_BASE_URL;
    use crate::retry::RetryPolicy;

    fn client(mock: MockClient) -> GraphClient<MockClient> {
        GraphClient::new(
            mock,
            Url::parse(DEFAULT_BASE_URL).unwrap(),
            "token".to_string(),
            RetryPolicy::no_backoff(3),
        )
    }

    fn range_body(address: &str, rows: &[&[&str]]) -> serde_json::Value {
        json!({
            "address": format!("Sheet1!{address}"),
            "text": rows,
        })
    }

    #[tokio::test]
    async fn streams_rows_band_by_band() {
        logutil::init_test();
        let mock = MockClient::new();
        mock.push_response(200, range_body("A2:B3", &[&["1", "a"], &["2", "b"]]));
        mock.push_response(200, range_body("A4:B4", &[&["3", "c"]]));
        let client = client(mock);

        let body = TableRange::from_address("A2:B4").unwrap();
        let mut stream = RowStream::new(
            &client,
            "/drives/d1/items/f1/workbook/worksheets/ws1".to_string(),
            Vec::new(),
            body.split(4, None),
        );

        assert_eq!(stream.read_next().await.unwrap().unwrap(), ["1", "a"]);
        // Second band not requested until the first is drained.
        assert_eq!(client.client().request_count(), 1);
        assert_eq!(stream.read_next().await.unwrap().unwrap(), ["2", "b"]);
        assert_eq!(stream.read_next().await.unwrap().unwrap(), ["3", "c"]);
        assert_eq!(client.client().request_count(), 2);
        assert_eq!(stream.read_next().await.unwrap(), None);
        assert_eq!(stream.read_next().await.unwrap(), None);

        let urls = client.client().request_urls();
        assert!(urls[0].contains("range(address='A2%3AB3')"), "{}", urls[0]);
        assert!(urls[0].ends_with("$select=address,text"), "{}", urls[0]);
    }

    #[tokio::test]
    async fn sends_session_header_when_present() {
        let mock = MockClient::new();
        mock.push_response(200, range_body("A2:A2", &[&["x"]]));
        let client = client(mock);

        let body = TableRange::from_address("A2:A2").unwrap();
        let mut stream = RowStream::new(
            &client,
            "/drives/d1/items/f1/workbook/worksheets/ws1".to_string(),
            vec![("Workbook-Session-Id".to_string(), "sess-1".to_string())],
            body.split(1000, None),
        );
        stream.read_next().await.unwrap();

        let requests = client.client().requests();
        assert_eq!(
            requests[0].headers.get("Workbook-Session-Id").unwrap(),
            "sess-1"
        );
    }

    #[tokio::test]
    async fn pagination_link_in_range_read_is_an_error() {
        let mock = MockClient::new();
        mock.push_response(
            200,
            json!({
                "address": "Sheet1!A2:A2",
                "text": [["x"]],
                "@odata.nextLink": "https://graph.microsoft.com/v1.0/next",
            }),
        );
        let client = client(mock);

        let body = TableRange::from_address("A2:A2").unwrap();
        let mut stream = RowStream::new(
            &client,
            "/drives/d1/items/f1/workbook/worksheets/ws1".to_string(),
            Vec::new(),
            body.split(1000, None),
        );
        let err = stream.read_next().await.unwrap_err();
        assert!(matches!(err, SheetsError::UnexpectedPagination), "{err:?}");
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing_and_makes_no_calls() {
        let mut stream = RowStream::<MockClient>::empty();
        assert_eq!(stream.read_next().await.unwrap(), None);
    }
}
