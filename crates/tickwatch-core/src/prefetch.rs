//! Debounced, concurrency-capped batch prefetching for a visible symbol set.
//!
//! One parameterized component serves every data domain (news metadata,
//! analyst ratings, ...): the endpoint, cache TTL, batch size, and timing
//! all come from [`PrefetchConfig`], so the coordination logic exists
//! exactly once.
//!
//! On every visible-set change each symbol is classified against the cache:
//! fresh entries surface immediately and are skipped; stale-but-present
//! entries surface immediately and are queued for a low-priority background
//! refresh; absent entries are queued for an immediate fetch. The fetch
//! cycle runs behind a debounce so rapid successive changes coalesce, and
//! fetched symbols enter a cooldown window before they become eligible
//! again. Batches pass through the shared [`RateLimiter`]; responses merge
//! into both the persistent cache and the in-memory snapshot,
//! last-write-wins per key.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::cache::ExpiringCache;
use crate::limiter::{Priority, RateLimiter};
use crate::transport::FetchError;
use crate::{Symbol, ValidationError};

/// Source of batched metadata for one data domain.
pub trait BatchLoader<T>: Send + Sync {
    /// Fetch metadata for `symbols`. Symbols the upstream has nothing for
    /// are simply absent from the result map.
    ///
    /// The future is `'static`: implementations clone whatever handles they
    /// need into it, so a pending load never borrows the loader.
    fn load(
        &self,
        symbols: Vec<Symbol>,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<Symbol, T>, FetchError>> + Send + 'static>>;
}

/// Per-domain prefetch parameters.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Limiter endpoint label for this domain.
    pub endpoint: String,
    /// Freshness window for cached entries.
    pub ttl: Duration,
    /// Symbols per upstream batch.
    pub batch_size: usize,
    /// Batches allowed in flight simultaneously.
    pub max_concurrent_batches: usize,
    /// Quiet period before a visible-set change triggers a fetch cycle.
    pub debounce: Duration,
    /// How long a fetched symbol stays ineligible for refetch.
    pub refetch_cooldown: Duration,
}

impl PrefetchConfig {
    pub fn new(endpoint: impl Into<String>, ttl: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            ttl,
            batch_size: 50,
            max_concurrent_batches: 2,
            debounce: Duration::from_millis(200),
            refetch_cooldown: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ttl.is_zero() {
            return Err(ValidationError::ZeroTtl);
        }
        if self.batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize);
        }
        if self.max_concurrent_batches == 0 {
            return Err(ValidationError::ZeroBatchConcurrency);
        }
        Ok(())
    }
}

struct PrefetchInner<T> {
    config: PrefetchConfig,
    cache: ExpiringCache,
    limiter: RateLimiter,
    loader: Arc<dyn BatchLoader<T>>,
    state: Mutex<HashMap<Symbol, T>>,
    recently_fetched: Mutex<HashMap<Symbol, Instant>>,
    pending_immediate: Mutex<HashSet<Symbol>>,
    pending_refresh: Mutex<HashSet<Symbol>>,
    enabled: AtomicBool,
}

/// Debounced batch prefetcher for one data domain. Cheap to clone.
pub struct BatchPrefetcher<T> {
    inner: Arc<PrefetchInner<T>>,
    debounce_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T> Clone for BatchPrefetcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            debounce_task: Arc::clone(&self.debounce_task),
        }
    }
}

impl<T> BatchPrefetcher<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Build a prefetcher over a namespaced cache, a shared limiter handle,
    /// and a domain loader.
    pub fn new(
        config: PrefetchConfig,
        cache: ExpiringCache,
        limiter: RateLimiter,
        loader: Arc<dyn BatchLoader<T>>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(PrefetchInner {
                config,
                cache,
                limiter,
                loader,
                state: Mutex::new(HashMap::new()),
                recently_fetched: Mutex::new(HashMap::new()),
                pending_immediate: Mutex::new(HashSet::new()),
                pending_refresh: Mutex::new(HashSet::new()),
                enabled: AtomicBool::new(true),
            }),
            debounce_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Report the currently visible symbol set.
    ///
    /// Cached values surface into the snapshot immediately; everything that
    /// needs the network is scheduled behind the debounce window, so rapid
    /// successive calls coalesce into one fetch cycle.
    pub fn update_visible(&self, symbols: &[Symbol]) {
        if !self.inner.enabled.load(Ordering::Relaxed) {
            return;
        }

        let inner = &self.inner;
        let mut scheduled = false;

        for symbol in symbols {
            if inner.in_cooldown(symbol) {
                continue;
            }

            if let Some(fresh) = inner.cache.get::<T>(symbol.as_str(), inner.config.ttl) {
                inner
                    .state
                    .lock()
                    .expect("prefetch state lock")
                    .insert(symbol.clone(), fresh);
                continue;
            }

            if let Some(stale) = inner.cache.get_stale::<T>(symbol.as_str()) {
                // Render the stale value now, refresh quietly later.
                inner
                    .state
                    .lock()
                    .expect("prefetch state lock")
                    .insert(symbol.clone(), stale.data);
                inner
                    .pending_refresh
                    .lock()
                    .expect("prefetch refresh lock")
                    .insert(symbol.clone());
                scheduled = true;
                continue;
            }

            inner
                .pending_immediate
                .lock()
                .expect("prefetch immediate lock")
                .insert(symbol.clone());
            scheduled = true;
        }

        if scheduled {
            self.arm_debounce();
        }
    }

    /// Restart the debounce timer; the fetch cycle itself is detached so an
    /// in-flight cycle is never cancelled by a newer visible-set change.
    fn arm_debounce(&self) {
        let inner = Arc::clone(&self.inner);
        let debounce = inner.config.debounce;

        let mut slot = self.debounce_task.lock().expect("debounce task lock");
        if let Some(task) = slot.take() {
            task.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            tokio::spawn(run_cycle(inner));
        }));
    }

    /// Current merged view for this domain.
    pub fn snapshot(&self) -> HashMap<Symbol, T> {
        self.inner.state.lock().expect("prefetch state lock").clone()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<T> {
        self.inner
            .state
            .lock()
            .expect("prefetch state lock")
            .get(symbol)
            .cloned()
    }

    /// Suspend or resume scheduling. Disabling also drops any armed
    /// debounce timer and pending symbols.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            if let Some(task) = self
                .debounce_task
                .lock()
                .expect("debounce task lock")
                .take()
            {
                task.abort();
            }
            self.inner
                .pending_immediate
                .lock()
                .expect("prefetch immediate lock")
                .clear();
            self.inner
                .pending_refresh
                .lock()
                .expect("prefetch refresh lock")
                .clear();
        }
    }
}

impl<T> PrefetchInner<T> {
    fn in_cooldown(&self, symbol: &Symbol) -> bool {
        let recent = self
            .recently_fetched
            .lock()
            .expect("prefetch cooldown lock");
        recent
            .get(symbol)
            .is_some_and(|fetched_at| fetched_at.elapsed() < self.config.refetch_cooldown)
    }

    fn mark_fetched(&self, symbols: &[Symbol]) {
        let now = Instant::now();
        let mut recent = self
            .recently_fetched
            .lock()
            .expect("prefetch cooldown lock");
        recent.retain(|_, fetched_at| fetched_at.elapsed() < self.config.refetch_cooldown);
        for symbol in symbols {
            recent.insert(symbol.clone(), now);
        }
    }
}

/// One fetch cycle: drain the pending sets, dedupe, chunk, and issue
/// batches under the concurrency cap.
async fn run_cycle<T>(inner: Arc<PrefetchInner<T>>)
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let immediate: Vec<Symbol> = {
        let mut pending = inner
            .pending_immediate
            .lock()
            .expect("prefetch immediate lock");
        pending.drain().collect()
    };
    let refresh: Vec<Symbol> = {
        let mut pending = inner
            .pending_refresh
            .lock()
            .expect("prefetch refresh lock");
        pending.drain().collect()
    };

    // Re-check freshness and cooldown at fire time: a concurrent cycle may
    // already have covered some of these symbols.
    let eligible = |symbol: &Symbol| {
        !inner.in_cooldown(symbol)
            && inner
                .cache
                .get::<T>(symbol.as_str(), inner.config.ttl)
                .is_none()
    };
    let mut immediate: Vec<Symbol> = immediate.into_iter().filter(|s| eligible(s)).collect();
    let mut refresh: Vec<Symbol> = refresh
        .into_iter()
        .filter(|s| eligible(s) && !immediate.contains(s))
        .collect();

    // Stable ordering keeps batch composition deterministic.
    immediate.sort();
    refresh.sort();

    let mut batches: Vec<(Vec<Symbol>, Priority)> = Vec::new();
    for chunk in immediate.chunks(inner.config.batch_size) {
        batches.push((chunk.to_vec(), Priority::Normal));
    }
    for chunk in refresh.chunks(inner.config.batch_size) {
        batches.push((chunk.to_vec(), Priority::Low));
    }

    if batches.is_empty() {
        return;
    }
    debug!(
        endpoint = %inner.config.endpoint,
        batches = batches.len(),
        "starting prefetch cycle"
    );

    let mut queue = batches.into_iter();
    let mut in_flight: JoinSet<()> = JoinSet::new();
    loop {
        while in_flight.len() < inner.config.max_concurrent_batches {
            let Some((chunk, priority)) = queue.next() else {
                break;
            };
            let inner = Arc::clone(&inner);
            in_flight.spawn(async move {
                fetch_batch(&inner, chunk, priority).await;
            });
        }

        if in_flight.join_next().await.is_none() {
            break;
        }
    }
}

async fn fetch_batch<T>(inner: &PrefetchInner<T>, chunk: Vec<Symbol>, priority: Priority)
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let loader = Arc::clone(&inner.loader);
    let requested = chunk.clone();
    let result = inner
        .limiter
        .enqueue(&inner.config.endpoint, priority, move || {
            loader.load(requested.clone())
        })
        .await;

    match result {
        Ok(fetched) => {
            for (symbol, value) in &fetched {
                inner
                    .cache
                    .set(symbol.as_str(), value, Some(inner.config.ttl));
            }
            {
                let mut state = inner.state.lock().expect("prefetch state lock");
                for (symbol, value) in fetched {
                    state.insert(symbol, value);
                }
            }
            // Every requested symbol enters cooldown, including those the
            // upstream had nothing for, so absent data is not re-polled on
            // each visibility change.
            inner.mark_fetched(&chunk);
        }
        Err(err) => {
            warn!(endpoint = %inner.config.endpoint, %err, "prefetch batch failed");
        }
    }
}
