//! Request and response snapshots flowing through the interceptor.
//!
//! Responses are plain data so they can be cached, replayed and
//! synthesized without holding on to a live connection.

use std::borrow::Cow;

use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::queue::QueueName;

/// Header carried by synthetic responses for deferred operations.
pub const DEFERRED_RETRY_HEADER: &str = "x-offline-retry";

/// Body of the synthetic 503 returned for a search deferred while offline.
pub const DEFERRED_SEARCH_BODY: &str = "The request could not be completed as the device is offline. \
The request will be retried once the device is back online.";

/// How the request was initiated by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation
    Navigate,

    /// Any other fetch (XHR, asset, API call)
    #[default]
    Fetch,
}

/// An outbound request intercepted on its way to the network
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub mode: RequestMode,
}

impl HttpRequest {
    /// Create a request with no headers and an empty body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
            mode: RequestMode::Fetch,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// A top-level navigation to `url`
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body and set the content type
    pub fn with_json<T: Serialize>(self, value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    /// Body decoded as UTF-8 (lossy)
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Body parsed as JSON
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// A response snapshot: status, headers and the full body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Empty response with the canonical reason phrase for `status`
    pub fn new(status: u16) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();

        Self {
            status,
            status_text,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Empty 200, used as the optimistic answer to deferred mutations
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// The 503 returned when an offline operation has been queued for retry.
    ///
    /// The marker header lets callers tell "will retry" apart from a genuine
    /// server-side 503.
    pub fn deferred_retry(queue: QueueName) -> Self {
        Self::new(503)
            .with_header("Content-Type", "text/plain")
            .with_header(DEFERRED_RETRY_HEADER, queue.as_str())
            .with_body(DEFERRED_SEARCH_BODY)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup (first match)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Only a 200 counts as success for caching and replay
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// True for synthetic responses standing in for a queued operation
    pub fn is_deferred_retry(&self) -> bool {
        self.header(DEFERRED_RETRY_HEADER).is_some()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}
