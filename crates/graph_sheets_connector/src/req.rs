use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::error;
use url::Url;

use crate::errors::{Result, SheetsError, classify};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Header carrying the workbook session id on range/header reads.
pub const SESSION_ID_HEADER: &str = "Workbook-Session-Id";

const BODY_CONTENT_TYPE: &str = "application/json";

// Match urlencode semantics: keep unreserved characters only.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Substitute `{placeholder}` tokens in a URI template with encoded values.
pub(crate) fn replace_params_in_uri(uri: &str, params: &[(&str, &str)]) -> String {
    let mut out = uri.to_string();
    for (key, value) in params {
        out = out.replace(
            &format!("{{{key}}}"),
            &utf8_percent_encode(value, URI_COMPONENT).to_string(),
        );
    }
    out
}

pub(crate) fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Pull the continuation link out of a response body, if any.
pub(crate) fn next_link(body: &Value) -> Option<&str> {
    body.get("@odata.nextLink").and_then(Value::as_str)
}

/// Authenticated client for a Graph-compatible backend.
///
/// Owns the base URL, the bearer token, and the retry policy; every call made
/// through it is retried and, on final failure, classified.
#[derive(Debug)]
pub struct GraphClient<C: HttpClient> {
    client: C,
    base_url: Url,
    access_token: String,
    retry: RetryPolicy,
}

impl<C: HttpClient> GraphClient<C> {
    pub fn new(client: C, base_url: Url, access_token: String, retry: RetryPolicy) -> Self {
        GraphClient {
            client,
            base_url,
            access_token,
            retry,
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    pub async fn get(
        &self,
        uri: &str,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        self.execute(Method::GET, uri, params, None, headers).await
    }

    pub async fn post(
        &self,
        uri: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        self.execute(Method::POST, uri, params, body, headers).await
    }

    async fn execute(
        &self,
        method: Method,
        uri: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let request = self.build_request(method, uri, params, body, headers)?;
        self.retry
            .call(|| self.execute_once(request.clone()))
            .await
            .map_err(classify)
    }

    fn build_request(
        &self,
        method: Method,
        uri: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpRequest> {
        let uri = replace_params_in_uri(uri, params);
        let url = self.resolve_url(&uri)?;

        let mut request = HttpRequest::new(method, url);
        request.headers.insert(
            AUTHORIZATION,
            HeaderValue::try_from(format!("Bearer {}", self.access_token))
                .map_err(|_| SheetsError::UnexpectedValue("Invalid access token.".to_string()))?,
        );
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static(BODY_CONTENT_TYPE));

        for (name, value) in headers {
            let name = HeaderName::try_from(*name).map_err(|e| {
                SheetsError::UnexpectedValue(format!("Invalid header name \"{name}\": {e}"))
            })?;
            let value = HeaderValue::try_from(*value).map_err(|e| {
                SheetsError::UnexpectedValue(format!("Invalid header value: {e}"))
            })?;
            request.headers.insert(name, value);
        }

        if let Some(body) = body {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(BODY_CONTENT_TYPE));
            request.body = Some(serde_json::to_vec(body)?.into());
        }

        Ok(request)
    }

    /// Resolve a request URI against the base URL. Continuation links come
    /// back absolute and are used as-is.
    fn resolve_url(&self, uri: &str) -> Result<Url> {
        let full = if uri.starts_with("https://") || uri.starts_with("http://") {
            uri.to_string()
        } else {
            format!("{}{}", self.base_url.as_str().trim_end_matches('/'), uri)
        };
        Url::parse(&full).map_err(|e| SheetsError::UrlParse(format!("{e}: \"{full}\"")))
    }

    async fn execute_once(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.client.do_request(request).await?;
        if response.status.is_success() {
            return Ok(response);
        }

        let (code, message) = parse_error_body(&response.body);
        error!(
            %url,
            status = response.status.as_u16(),
            response = %String::from_utf8_lossy(&response.body),
            "api request failed",
        );
        Err(SheetsError::Request {
            status: response.status,
            code,
            message,
        })
    }
}

/// Extract the Graph `error.code` / `error.message` pair from a failed
/// response body. Unparseable bodies yield empty strings.
pub(crate) fn parse_error_body(body: &[u8]) -> (String, String) {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return (String::new(), String::new());
    };
    parse_error_value(&value)
}

pub(crate) fn parse_error_value(body: &Value) -> (String, String) {
    let error = &body["error"];
    let code = error["code"].as_str().unwrap_or_default();
    let message = error["message"].as_str().unwrap_or_default();
    (ucfirst(code), message.to_string())
}

fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
