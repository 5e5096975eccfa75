//! Thin transport abstraction so the access layer can run against any HTTP
//! implementation (and tests can run against a scripted one).

use std::fmt::Debug;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::errors::Result;

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A single wire request, kept as plain data so the retry layer can re-issue
/// it and tests can inspect it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        HttpRequest {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// A fully buffered response.
///
/// Everything this connector reads is JSON of bounded size, so there's no
/// value in streaming bodies.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub trait HttpClient: Debug + Send + Sync {
    /// Do the request.
    fn do_request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        Ok(ReqwestClient { inner })
    }
}

impl HttpClient for ReqwestClient {
    fn do_request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        let client = self.inner.clone();
        Box::pin(async move {
            let mut builder = client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use reqwest::header::{HeaderName, HeaderValue};

    use super::*;

    /// Replays canned responses in order and records every request issued.
    #[derive(Debug, Default)]
    pub struct MockClient {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockClient {
        pub fn new() -> Self {
            MockClient::default()
        }

        pub fn push_response(&self, status: u16, body: serde_json::Value) {
            self.push_response_with_headers(status, &[], body);
        }

        pub fn push_response_with_headers(
            &self,
            status: u16,
            headers: &[(&str, &str)],
            body: serde_json::Value,
        ) {
            let mut map = HeaderMap::new();
            for (name, value) in headers {
                map.insert(
                    HeaderName::try_from(*name).unwrap(),
                    HeaderValue::try_from(*value).unwrap(),
                );
            }
            self.responses.lock().unwrap().push_back(HttpResponse {
                status: StatusCode::from_u16(status).unwrap(),
                headers: map,
                body: Bytes::from(serde_json::to_vec(&body).unwrap()),
            });
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_urls(&self) -> Vec<String> {
            self.requests()
                .iter()
                .map(|r| r.url.to_string())
                .collect()
        }
    }

    impl HttpClient for MockClient {
        fn do_request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
            self.requests.lock().unwrap().push(request.clone());
            let response = self.responses.lock().unwrap().pop_front();
            Box::pin(async move {
                match response {
                    Some(response) => Ok(response),
                    None => panic!("mock client ran out of responses, url: {}", request.url),
                }
            })
        }
    }
}
