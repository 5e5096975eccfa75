//! Combining independent calls into `$batch` requests.
//!
//! The backend accepts up to 20 sub-requests per batch document. Results come
//! back keyed by sub-request id (order is not guaranteed), each with its own
//! status and JSON body, and each body may carry a continuation link that has
//! to be followed with a plain GET.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use reqwest::Method;
use serde_json::{Value, json};

use crate::errors::{Result, SheetsError};
use crate::http::HttpClient;
use crate::req::{GraphClient, next_link, parse_error_value, replace_params_in_uri};

/// Hard cap on sub-requests per batch document.
pub const MAX_REQUESTS_PER_BATCH: usize = 20;

const BATCH_ENDPOINT: &str = "/$batch";

type Mapper<T> = Box<dyn FnMut(&Value) -> Result<Vec<T>> + Send>;
type ErrorHandler = Box<dyn FnMut(SheetsError) + Send>;

/// Opaque handle for a registered sub-request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchItemId(String);

impl fmt::Display for BatchItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical call inside a batch, built up fluently:
///
/// ```ignore
/// batch.add(
///     BatchItem::get("/sites/{siteId}/drives?$select=id,name")
///         .arg("siteId", site_id)
///         .map(move |body| /* yield zero or more values */)
///         .on_error(move |err| warn!(%err, "site listing failed")),
/// );
/// ```
pub struct BatchItem<T> {
    method: Method,
    uri: String,
    mapper: Mapper<T>,
    error_handler: Option<ErrorHandler>,
}

impl BatchItem<Value> {
    /// A GET sub-request yielding its raw body.
    pub fn get(uri_template: &str) -> Self {
        BatchItem::new(Method::GET, uri_template)
    }

    /// A POST sub-request yielding its raw body.
    pub fn post(uri_template: &str) -> Self {
        BatchItem::new(Method::POST, uri_template)
    }

    fn new(method: Method, uri_template: &str) -> Self {
        BatchItem {
            method,
            uri: uri_template.to_string(),
            mapper: Box::new(|body| Ok(vec![body.clone()])),
            error_handler: None,
        }
    }
}

impl<T> BatchItem<T> {
    /// Substitute one `{placeholder}` in the URI template.
    pub fn arg(mut self, key: &str, value: &str) -> Self {
        self.uri = replace_params_in_uri(&self.uri, &[(key, value)]);
        self
    }

    /// Map each response body (including continuation pages) to zero or more
    /// values.
    pub fn map<U>(self, mapper: impl FnMut(&Value) -> Result<Vec<U>> + Send + 'static) -> BatchItem<U> {
        BatchItem {
            method: self.method,
            uri: self.uri,
            mapper: Box::new(mapper),
            error_handler: self.error_handler,
        }
    }

    /// Route this item's failures to `handler` instead of aborting the whole
    /// batch. The engine moves on to the next item afterwards.
    pub fn on_error(mut self, handler: impl FnMut(SheetsError) + Send + 'static) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }
}

impl<T> fmt::Debug for BatchItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchItem")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

/// Collects sub-requests and executes them in batches of at most
/// [`MAX_REQUESTS_PER_BATCH`].
pub struct BatchRequest<'a, C: HttpClient, T> {
    client: &'a GraphClient<C>,
    limit: Option<usize>,
    id_counter: u64,
    items: Vec<(String, BatchItem<T>)>,
}

impl<'a, C: HttpClient, T> BatchRequest<'a, C, T> {
    pub(crate) fn new(client: &'a GraphClient<C>, limit: Option<usize>) -> Self {
        BatchRequest {
            client,
            limit,
            id_counter: 1,
            items: Vec::new(),
        }
    }

    pub fn add(&mut self, item: BatchItem<T>) -> BatchItemId {
        let id = self.id_counter.to_string();
        self.id_counter += 1;
        self.items.push((id.clone(), item));
        BatchItemId(id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Turn the registered items into a lazy result stream. No network call
    /// happens here; an empty batch in particular never touches the wire
    /// (the backend rejects an empty batch payload as a bad request).
    pub fn execute(self) -> BatchResults<'a, C, T> {
        BatchResults {
            client: self.client,
            limit: self.limit,
            emitted: 0,
            pending: self.items.into(),
            items: HashMap::new(),
            responses: VecDeque::new(),
            current: None,
        }
    }
}

/// Lazy stream of mapped batch results.
///
/// Sub-batches are posted on demand: once the global limit is reached, no
/// further sub-batch or continuation page is fetched.
pub struct BatchResults<'a, C: HttpClient, T> {
    client: &'a GraphClient<C>,
    limit: Option<usize>,
    emitted: usize,
    /// Items not yet posted, in registration order.
    pending: VecDeque<(String, BatchItem<T>)>,
    /// Items of the in-flight sub-batch, keyed by id.
    items: HashMap<String, BatchItem<T>>,
    /// Demultiplexed raw responses of the in-flight sub-batch.
    responses: VecDeque<RawItemResponse>,
    /// The item currently being drained.
    current: Option<CurrentItem<T>>,
}

struct CurrentItem<T> {
    id: String,
    buffered: VecDeque<T>,
    next_link: Option<String>,
}

#[derive(Debug)]
struct RawItemResponse {
    id: String,
    status: u16,
    body: Value,
}

impl<C: HttpClient, T> BatchResults<'_, C, T> {
    /// Read the next mapped value.
    ///
    /// Returns `Ok(None)` once every item (and every continuation page) has
    /// been drained or the global limit was reached.
    pub async fn read_next(&mut self) -> Result<Option<T>> {
        loop {
            if self.limit.is_some_and(|limit| self.emitted >= limit) {
                return Ok(None);
            }

            if let Some(current) = &mut self.current {
                if let Some(value) = current.buffered.pop_front() {
                    self.emitted += 1;
                    return Ok(Some(value));
                }
                let id = current.id.clone();
                match current.next_link.take() {
                    Some(link) => self.follow_next_page(id, link).await?,
                    None => {
                        self.current = None;
                        self.items.remove(&id);
                    }
                }
                continue;
            }

            if let Some(response) = self.responses.pop_front() {
                self.process_item_response(response)?;
                continue;
            }

            if !self.pending.is_empty() {
                self.post_next_sub_batch().await?;
                continue;
            }

            return Ok(None);
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(value) = self.read_next().await? {
            out.push(value);
        }
        Ok(out)
    }

    async fn post_next_sub_batch(&mut self) -> Result<()> {
        let take = self.pending.len().min(MAX_REQUESTS_PER_BATCH);
        let mut requests = Vec::with_capacity(take);
        for _ in 0..take {
            let Some((id, item)) = self.pending.pop_front() else {
                break;
            };
            requests.push(json!({
                "id": id,
                "method": item.method.as_str(),
                "url": item.uri,
            }));
            self.items.insert(id, item);
        }

        let response = self
            .client
            .post(BATCH_ENDPOINT, &[], Some(&json!({ "requests": requests })), &[])
            .await?;
        let body: Value = response.json()?;
        let responses = body
            .get("responses")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SheetsError::UnexpectedValue(
                    "Batch response is missing the \"responses\" field.".to_string(),
                )
            })?;

        for response in responses {
            // Defensive: some backends return numeric ids.
            let id = match &response["id"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let status = response["status"].as_u64().unwrap_or(0) as u16;
            let body = response.get("body").cloned().unwrap_or(Value::Null);
            self.responses.push_back(RawItemResponse { id, status, body });
        }
        Ok(())
    }

    /// Match a raw response back to its item by id and start draining it.
    fn process_item_response(&mut self, response: RawItemResponse) -> Result<()> {
        let item = self.items.get_mut(&response.id).ok_or_else(|| {
            SheetsError::UnexpectedValue(format!(
                "Request with id \"{}\" not found.",
                response.id
            ))
        })?;

        if !(200..300).contains(&response.status) {
            let (code, message) = parse_error_value(&response.body);
            let err = SheetsError::BatchItem {
                id: response.id.clone(),
                status: response.status,
                code,
                message,
            };
            return self.handle_item_error(&response.id, err);
        }

        match (item.mapper)(&response.body) {
            Ok(values) => {
                self.current = Some(CurrentItem {
                    id: response.id,
                    buffered: values.into(),
                    next_link: next_link(&response.body).map(str::to_string),
                });
                Ok(())
            }
            Err(err) => self.handle_item_error(&response.id, err),
        }
    }

    /// Continuation pages are fetched with a direct authenticated GET and fed
    /// through the same mapper as the original item.
    async fn follow_next_page(&mut self, id: String, link: String) -> Result<()> {
        let response = self.client.get(&link, &[], &[]).await?;
        let body: Value = response.json()?;

        let item = self.items.get_mut(&id).ok_or_else(|| {
            SheetsError::UnexpectedValue(format!("Request with id \"{id}\" not found."))
        })?;
        match (item.mapper)(&body) {
            Ok(values) => {
                if let Some(current) = self.current.as_mut() {
                    current.buffered.extend(values);
                    current.next_link = next_link(&body).map(str::to_string);
                }
                Ok(())
            }
            Err(err) => {
                self.current = None;
                self.handle_item_error(&id, err)
            }
        }
    }

    fn handle_item_error(&mut self, id: &str, err: SheetsError) -> Result<()> {
        let Some(mut item) = self.items.remove(id) else {
            return Err(err);
        };
        match &mut item.error_handler {
            Some(handler) => {
                handler(err);
                Ok(())
            }
            None => Err(err),
        }
    }
}
