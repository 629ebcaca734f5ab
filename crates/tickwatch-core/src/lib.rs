//! # Tickwatch Core
//!
//! Caching, scheduling, and quota management for market-data dashboards.
//!
//! ## Overview
//!
//! This crate provides the building blocks for a client that polls a
//! rate-limited market-data feed without blowing its call budget:
//!
//! - **Expiring versioned cache** over a pluggable key-value store
//! - **Market session clock** for US equities and round-the-clock assets
//! - **Priority rate limiter** with circuit breaker and persisted usage budgets
//! - **Batch prefetcher** that debounces visibility changes into capped batches
//! - **Feed client** for symbol-keyed JSON endpoints
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Expiring cache with schema versioning and quota eviction |
//! | [`circuit_breaker`] | Circuit breaker for resilient upstream calls |
//! | [`domain`] | Domain types (Symbol, UtcDateTime) |
//! | [`error`] | Core error types |
//! | [`feed`] | Market-data feed client and batch loader |
//! | [`limiter`] | Priority request queue with budget enforcement |
//! | [`prefetch`] | Debounced, concurrency-capped batch prefetcher |
//! | [`retry`] | Retry policy with exponential backoff |
//! | [`session`] | Exchange session calendar and polling cadence |
//! | [`transport`] | HTTP client abstraction |
//! | [`usage`] | Persisted daily/monthly usage accounting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tickwatch_core::{
//!     BatchPrefetcher, ExpiringCache, FeedClient, FeedConfig, LimiterConfig, MemoryStore,
//!     PrefetchConfig, RateLimiter, ReqwestHttpClient, Symbol,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn tickwatch_core::KvStore> = Arc::new(MemoryStore::unbounded());
//!     let cache = ExpiringCache::new(Arc::clone(&store), "quotes", "v1")?;
//!     let limiter = RateLimiter::new(LimiterConfig::default(), store);
//!
//!     let feed = FeedClient::new(
//!         Arc::new(ReqwestHttpClient::new()),
//!         FeedConfig::from_env("https://feed.example.com/v1"),
//!     );
//!
//!     let prefetcher = BatchPrefetcher::new(
//!         PrefetchConfig::new("quote", Duration::from_secs(30)),
//!         cache,
//!         limiter,
//!         Arc::new(feed.loader("quote")),
//!     )?;
//!
//!     let visible = vec![Symbol::parse("AAPL")?, Symbol::parse("MSFT")?];
//!     prefetcher.update_visible(&visible);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Visible symbols  │
//! └────────┬─────────┘
//!          │ debounce
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ BatchPrefetcher  │────▶│ ExpiringCache    │
//! └────────┬─────────┘     │ (KvStore)        │
//!          │ batches       └──────────────────┘
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ RateLimiter      │────▶│ CircuitBreaker   │
//! │ (priority queue) │     │ UsageTracker     │
//! └────────┬─────────┘     └──────────────────┘
//!          │ one at a time
//!          ▼
//! ┌──────────────────┐
//! │ FeedClient       │
//! │ (HttpClient)     │
//! └──────────────────┘
//! ```
//!
//! ## Security
//!
//! - API keys are read from environment variables only (never logged)
//! - Input validation on all domain types

pub mod cache;
pub mod circuit_breaker;
pub mod domain;
pub mod error;
pub mod feed;
pub mod limiter;
pub mod prefetch;
pub mod retry;
pub mod session;
pub mod transport;
pub mod usage;

// Re-export commonly used types at crate root for convenience

// Caching
pub use cache::{CacheStats, ExpiringCache, StaleEntry};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Domain types
pub use domain::{Symbol, UtcDateTime};

// Error types
pub use error::{CoreError, ValidationError};

// Feed client
pub use feed::{FeedClient, FeedConfig, FeedLoader};

// Rate limiting
pub use limiter::{LimiterConfig, LimiterError, Priority, RateLimiter, WindowQuota};

// Prefetching
pub use prefetch::{BatchLoader, BatchPrefetcher, PrefetchConfig};

// Retry logic
pub use retry::RetryPolicy;

// Session calendar
pub use session::{ExchangeCalendar, MarketSession};

// Storage (re-exported from tickwatch-store)
pub use tickwatch_store::{FileStore, KvStore, MemoryStore, StoreError};

// Transport types
pub use transport::{
    FetchError, HttpClient, HttpRequest, HttpResponse, MockHttpClient, ReqwestHttpClient,
};

// Usage accounting
pub use usage::{UsageStats, UsageTracker};
