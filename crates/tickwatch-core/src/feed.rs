//! Market-data feed client.
//!
//! Thin client for JSON endpoints that accept a comma-joined symbol list and
//! a query-string API key, returning an object keyed by symbol. Unexpected
//! shapes (arrays, nulls, foreign keys) decode to "no data" rather than an
//! error; only a body that is not JSON at all is a decode failure.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::prefetch::BatchLoader;
use crate::transport::{FetchError, HttpClient, HttpRequest};
use crate::Symbol;

/// Environment variable the API key is read from. Never logged.
pub const API_KEY_ENV: &str = "TICKWATCH_API_KEY";

/// Feed endpoint location and credentials.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl FeedConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_ms: 5_000,
        }
    }

    /// Read the API key from [`API_KEY_ENV`]. Endpoints that need no key
    /// work without it.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        Self {
            api_key: env::var(API_KEY_ENV).ok(),
            ..Self::new(base_url)
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Client for one feed host; produces per-endpoint [`BatchLoader`]s.
#[derive(Clone)]
pub struct FeedClient {
    http: Arc<dyn HttpClient>,
    config: FeedConfig,
}

impl FeedClient {
    pub fn new(http: Arc<dyn HttpClient>, config: FeedConfig) -> Self {
        Self { http, config }
    }

    /// Fetch `path` for `symbols`, returning the per-symbol JSON payloads.
    pub async fn fetch_symbol_map(
        &self,
        path: &str,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, Value>, FetchError> {
        fetch_symbol_map(&self.http, &self.config, path, symbols).await
    }

    /// A loader for `path` suitable for a [`crate::BatchPrefetcher`].
    pub fn loader(&self, path: impl Into<String>) -> FeedLoader {
        FeedLoader {
            http: Arc::clone(&self.http),
            config: self.config.clone(),
            path: path.into(),
        }
    }
}

/// [`BatchLoader`] bound to a single feed endpoint path.
#[derive(Clone)]
pub struct FeedLoader {
    http: Arc<dyn HttpClient>,
    config: FeedConfig,
    path: String,
}

impl BatchLoader<Value> for FeedLoader {
    fn load(
        &self,
        symbols: Vec<Symbol>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<HashMap<Symbol, Value>, FetchError>> + Send + 'static>,
    > {
        let http = Arc::clone(&self.http);
        let config = self.config.clone();
        let path = self.path.clone();
        Box::pin(async move { fetch_symbol_map(&http, &config, &path, &symbols).await })
    }
}

async fn fetch_symbol_map(
    http: &Arc<dyn HttpClient>,
    config: &FeedConfig,
    path: &str,
    symbols: &[Symbol],
) -> Result<HashMap<Symbol, Value>, FetchError> {
    if symbols.is_empty() {
        return Ok(HashMap::new());
    }

    let joined = symbols
        .iter()
        .map(Symbol::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let mut request = HttpRequest::get(format!(
        "{}/{}",
        config.base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
    .with_query("symbols", joined)
    .with_timeout_ms(config.timeout_ms);
    if let Some(api_key) = &config.api_key {
        request = request.with_query("apikey", api_key);
    }

    let response = http.execute(request).await?;
    if !response.is_success() {
        return Err(FetchError::Status(response.status));
    }

    let parsed: Value = serde_json::from_str(&response.body)
        .map_err(|err| FetchError::Decode(err.to_string()))?;

    let Value::Object(entries) = parsed else {
        // Empty array / null / scalar: the upstream has nothing for us.
        debug!(path, "feed response is not a symbol map; treating as no data");
        return Ok(HashMap::new());
    };

    let mut map = HashMap::with_capacity(entries.len());
    for (key, value) in entries {
        if let Ok(symbol) = Symbol::parse(&key) {
            map.insert(symbol, value);
        }
    }
    Ok(map)
}
