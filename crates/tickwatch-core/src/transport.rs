//! HTTP transport seam for upstream market-data calls.
//!
//! The trait keeps the crate testable offline: production code uses
//! [`ReqwestHttpClient`], tests script a [`MockHttpClient`] with canned
//! responses. Non-2xx statuses and transport failures are distinguishable
//! so retry policy can treat them separately.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Upstream fetch failure classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, timeout, or protocol failure before a status arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The body arrived but did not decode into the expected shape.
    #[error("response did not decode: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(status) => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Decode(_) => false,
        }
    }
}

/// Outgoing GET request with query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: BTreeMap::new(),
            timeout_ms: 5_000,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Full URL with the query string appended, values percent-encoded.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.url, query)
    }
}

/// Response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport contract supporting async execution.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, FetchError>> + Send + 'a>>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent("tickwatch/0.1.0")
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let timeout = std::time::Duration::from_millis(request.timeout_ms);
            let response = self
                .client
                .get(request.full_url())
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        FetchError::Transport(format!("request timeout: {err}"))
                    } else if err.is_connect() {
                        FetchError::Transport(format!("connection failed: {err}"))
                    } else {
                        FetchError::Transport(format!("request failed: {err}"))
                    }
                })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|err| FetchError::Transport(format!("failed to read body: {err}")))?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Scriptable transport for deterministic offline tests.
///
/// Responses are served in FIFO order; once the script is exhausted every
/// call answers `200 {}`. Executed requests are recorded for inspection.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(Ok(response));
    }

    pub fn push_error(&self, error: FetchError) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().expect("mock seen lock").clone()
    }
}

impl HttpClient for MockHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().expect("mock seen lock").push(request);
            self.script
                .lock()
                .expect("mock script lock")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::ok_json("{}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_percent_encodes_query_values() {
        let request = HttpRequest::get("https://example.test/v1/news")
            .with_query("symbols", "AAPL,MSFT")
            .with_query("apikey", "k e y");

        assert_eq!(
            request.full_url(),
            "https://example.test/v1/news?apikey=k%20e%20y&symbols=AAPL%2CMSFT"
        );
    }

    #[test]
    fn transient_classification_matches_retryable_statuses() {
        assert!(FetchError::Transport(String::from("timeout")).is_transient());
        assert!(FetchError::Status(429).is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::Decode(String::from("bad json")).is_transient());
    }

    #[tokio::test]
    async fn mock_serves_script_in_order_then_defaults() {
        let mock = MockHttpClient::new();
        mock.push_response(HttpResponse {
            status: 500,
            body: String::new(),
        });
        mock.push_error(FetchError::Transport(String::from("boom")));

        let request = HttpRequest::get("https://example.test/a");
        assert_eq!(
            mock.execute(request.clone()).await.expect("scripted").status,
            500
        );
        assert!(mock.execute(request.clone()).await.is_err());
        assert!(mock.execute(request).await.expect("default").is_success());
        assert_eq!(mock.requests().len(), 3);
    }
}
