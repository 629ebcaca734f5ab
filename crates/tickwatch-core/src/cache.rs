//! Versioned, TTL-expiring cache over a persistent key-value store.
//!
//! Entries are serialized JSON envelopes carrying the payload, a write
//! timestamp, a schema-version tag, and an optional per-entry TTL. A version
//! bump invalidates every prior entry lazily: mismatched envelopes read as
//! absent and are evicted on contact, with no migration pass. Keys under the
//! same store that do not look like cache envelopes are never touched.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tickwatch_store::KvStore;

use crate::{UtcDateTime, ValidationError};

/// Fallback TTL applied by [`ExpiringCache::get_stale`] when the entry was
/// stored without one.
const DEFAULT_STALE_TTL: Duration = Duration::from_secs(30);

/// Age window used by the quota-recovery eviction pass inside
/// [`ExpiringCache::set`].
const QUOTA_EVICTION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Persisted envelope wrapping every cache payload.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    #[serde(rename = "v")]
    version: String,
    #[serde(rename = "ts")]
    timestamp_ms: i64,
    #[serde(rename = "ttl", skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
    data: serde_json::Value,
}

/// Value returned by [`ExpiringCache::get_stale`]: the payload plus enough
/// freshness metadata for stale-while-revalidate callers.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleEntry<T> {
    pub data: T,
    pub timestamp: UtcDateTime,
    pub is_stale: bool,
    pub age: Duration,
}

/// Diagnostic snapshot of a cache namespace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub count: usize,
    pub size_kb: f64,
    pub oldest: Option<UtcDateTime>,
}

/// Expiring cache bound to a namespace within a [`KvStore`].
///
/// Cloning shares the underlying store handle; all methods take `&self`.
#[derive(Clone)]
pub struct ExpiringCache {
    store: Arc<dyn KvStore>,
    namespace: String,
    version: String,
}

impl ExpiringCache {
    /// Create a cache over `store` with the given namespace and deploy-time
    /// schema version.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidNamespace`] when the namespace is
    /// empty or contains the `:` key separator.
    pub fn new(
        store: Arc<dyn KvStore>,
        namespace: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.contains(':') {
            return Err(ValidationError::InvalidNamespace { value: namespace });
        }

        Ok(Self {
            store,
            namespace,
            version: version.into(),
        })
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn is_namespace_key(&self, storage_key: &str) -> bool {
        storage_key
            .strip_prefix(&self.namespace)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    /// Read the raw envelope for `key`, evicting version mismatches.
    fn read_envelope(&self, key: &str) -> Option<CacheEnvelope> {
        let storage_key = self.storage_key(key);
        let raw = self.store.get(&storage_key)?;

        let envelope: CacheEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                // Not one of ours, or corrupted: fail closed and clear it.
                self.store.remove(&storage_key);
                return None;
            }
        };

        if envelope.version != self.version {
            debug!(key, stored = %envelope.version, current = %self.version,
                "evicting cache entry with outdated schema version");
            self.store.remove(&storage_key);
            return None;
        }

        Some(envelope)
    }

    /// Returns the cached value for `key` if it is fresh.
    ///
    /// Fresh means the entry's schema version matches and its age does not
    /// exceed the stored per-entry TTL, falling back to `max_age` when the
    /// entry carries none. Expired entries are left in place for
    /// [`Self::get_stale`] callers.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let envelope = self.read_envelope(key)?;

        let age = UtcDateTime::from_unix_ms(envelope.timestamp_ms).elapsed_since(UtcDateTime::now());
        let allowed = envelope.ttl_ms.map(Duration::from_millis).unwrap_or(max_age);
        if age > allowed {
            return None;
        }

        serde_json::from_value(envelope.data).ok()
    }

    /// Returns the cached value for `key` regardless of freshness, annotated
    /// with whether it has outlived its TTL (default 30 s when none stored).
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<StaleEntry<T>> {
        let envelope = self.read_envelope(key)?;

        let timestamp = UtcDateTime::from_unix_ms(envelope.timestamp_ms);
        let age = timestamp.elapsed_since(UtcDateTime::now());
        let allowed = envelope
            .ttl_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STALE_TTL);

        let data = serde_json::from_value(envelope.data).ok()?;
        Some(StaleEntry {
            data,
            timestamp,
            is_stale: age > allowed,
            age,
        })
    }

    /// Store `data` under `key`, stamped with the current time and schema
    /// version.
    ///
    /// Storage failures never surface: on quota exhaustion, entries older
    /// than one hour are evicted and the write retried once; a second
    /// failure is logged and swallowed, and the caller proceeds uncached.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) {
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, %err, "cache payload is not serializable; skipping write");
                return;
            }
        };

        let envelope = CacheEnvelope {
            version: self.version.clone(),
            timestamp_ms: UtcDateTime::now().unix_ms(),
            ttl_ms: ttl.map(|t| t.as_millis() as u64),
            data,
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, %err, "cache envelope serialization failed; skipping write");
                return;
            }
        };

        let storage_key = self.storage_key(key);
        match self.store.set(&storage_key, &raw) {
            Ok(()) => {}
            Err(err) if err.is_quota_exceeded() => {
                let evicted = self.clear_oldest(QUOTA_EVICTION_WINDOW);
                debug!(key, evicted, "storage quota exceeded; evicted old entries and retrying");
                if let Err(err) = self.store.set(&storage_key, &raw) {
                    warn!(key, %err, "cache write failed after eviction; proceeding uncached");
                }
            }
            Err(err) => {
                warn!(key, %err, "cache write failed; proceeding uncached");
            }
        }
    }

    /// Remove the entry for `key`, if present.
    pub fn remove(&self, key: &str) {
        self.store.remove(&self.storage_key(key));
    }

    /// Remove every namespace entry older than `max_age`, returning the
    /// number removed. Keys that do not parse as cache envelopes are left
    /// alone.
    pub fn clear_oldest(&self, max_age: Duration) -> usize {
        let now = UtcDateTime::now();
        let mut removed = 0;

        for storage_key in self.store.keys() {
            if !self.is_namespace_key(&storage_key) {
                continue;
            }
            let Some(raw) = self.store.get(&storage_key) else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<CacheEnvelope>(&raw) else {
                continue;
            };

            let age = UtcDateTime::from_unix_ms(envelope.timestamp_ms).elapsed_since(now);
            if age > max_age {
                self.store.remove(&storage_key);
                removed += 1;
            }
        }

        removed
    }

    /// Remove every entry in this namespace, returning the number removed.
    /// Unrelated keys in the same store are preserved.
    pub fn clear_all(&self) -> usize {
        let mut removed = 0;
        for storage_key in self.store.keys() {
            if !self.is_namespace_key(&storage_key) {
                continue;
            }
            if self.store.get(&storage_key).is_some() {
                self.store.remove(&storage_key);
                removed += 1;
            }
        }
        removed
    }

    /// Diagnostic counts for this namespace.
    pub fn stats(&self) -> CacheStats {
        let mut count = 0;
        let mut size_bytes = 0usize;
        let mut oldest: Option<i64> = None;

        for storage_key in self.store.keys() {
            if !self.is_namespace_key(&storage_key) {
                continue;
            }
            let Some(raw) = self.store.get(&storage_key) else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<CacheEnvelope>(&raw) else {
                continue;
            };

            count += 1;
            size_bytes += storage_key.len() + raw.len();
            oldest = Some(match oldest {
                Some(current) => current.min(envelope.timestamp_ms),
                None => envelope.timestamp_ms,
            });
        }

        CacheStats {
            count,
            size_kb: size_bytes as f64 / 1024.0,
            oldest: oldest.map(UtcDateTime::from_unix_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_store::MemoryStore;

    fn cache_over(store: Arc<dyn KvStore>) -> ExpiringCache {
        ExpiringCache::new(store, "news", "v1").expect("valid namespace")
    }

    #[test]
    fn rejects_invalid_namespace() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::unbounded());
        assert!(matches!(
            ExpiringCache::new(Arc::clone(&store), "", "v1"),
            Err(ValidationError::InvalidNamespace { .. })
        ));
        assert!(matches!(
            ExpiringCache::new(store, "a:b", "v1"),
            Err(ValidationError::InvalidNamespace { .. })
        ));
    }

    #[test]
    fn get_returns_fresh_value_after_set() {
        let cache = cache_over(Arc::new(MemoryStore::unbounded()));

        cache.set("AAPL", &3usize, None);
        assert_eq!(cache.get::<usize>("AAPL", Duration::from_secs(60)), Some(3));
    }

    #[test]
    fn stored_ttl_overrides_caller_max_age() {
        let cache = cache_over(Arc::new(MemoryStore::unbounded()));

        cache.set("AAPL", &1usize, Some(Duration::from_millis(20)));
        std::thread::sleep(Duration::from_millis(40));

        // A generous max_age cannot resurrect an entry whose own TTL passed.
        assert_eq!(cache.get::<usize>("AAPL", Duration::from_secs(60)), None);

        let stale = cache
            .get_stale::<usize>("AAPL")
            .expect("expired entries stay readable via get_stale");
        assert_eq!(stale.data, 1);
        assert!(stale.is_stale);
        assert!(stale.age >= Duration::from_millis(40));
    }

    #[test]
    fn version_mismatch_reads_as_absent_and_evicts() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::unbounded());
        let old = ExpiringCache::new(Arc::clone(&store), "news", "v1").expect("cache");
        old.set("AAPL", &1usize, None);

        let bumped = ExpiringCache::new(Arc::clone(&store), "news", "v2").expect("cache");
        assert_eq!(bumped.get::<usize>("AAPL", Duration::from_secs(60)), None);
        assert!(bumped.get_stale::<usize>("AAPL").is_none());

        // The mismatched entry was evicted, not just skipped.
        assert!(store.get("news:AAPL").is_none());
    }

    #[test]
    fn set_twice_refreshes_without_changing_get() {
        let cache = cache_over(Arc::new(MemoryStore::unbounded()));

        cache.set("MSFT", &7usize, None);
        cache.set("MSFT", &7usize, None);
        assert_eq!(cache.get::<usize>("MSFT", Duration::from_secs(60)), Some(7));
        assert_eq!(cache.stats().count, 1);
    }

    #[test]
    fn quota_exhaustion_evicts_and_retries_once() {
        // Capacity fits roughly two envelopes.
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::with_capacity(130));
        let cache = cache_over(Arc::clone(&store));

        cache.set("A", &String::from("xxxxxxxxxx"), None);
        cache.set("B", &String::from("yyyyyyyyyy"), None);

        // The eviction window only removes entries older than an hour, so a
        // third write cannot fit and is swallowed without panicking.
        cache.set("C", &String::from("zzzzzzzzzz"), None);
        assert!(cache.get::<String>("C", Duration::from_secs(60)).is_none());

        // Earlier entries survive the failed write.
        assert!(cache.get::<String>("A", Duration::from_secs(60)).is_some());
    }

    #[test]
    fn clear_all_preserves_foreign_keys() {
        let store = Arc::new(MemoryStore::unbounded());
        store.set("unrelated", "do-not-touch").expect("set");
        store.set("newsworthy", "also-not-ours").expect("set");

        let shared: Arc<dyn KvStore> = store;
        let cache = cache_over(Arc::clone(&shared));
        cache.set("AAPL", &1usize, None);
        cache.set("MSFT", &2usize, None);

        assert_eq!(cache.clear_all(), 2);
        assert_eq!(shared.get("unrelated"), Some(String::from("do-not-touch")));
        assert_eq!(shared.get("newsworthy"), Some(String::from("also-not-ours")));
    }

    #[test]
    fn clear_oldest_spares_young_entries() {
        let cache = cache_over(Arc::new(MemoryStore::unbounded()));

        cache.set("AAPL", &1usize, None);
        std::thread::sleep(Duration::from_millis(30));
        cache.set("MSFT", &2usize, None);

        assert_eq!(cache.clear_oldest(Duration::from_millis(20)), 1);
        assert!(cache.get::<usize>("AAPL", Duration::from_secs(60)).is_none());
        assert!(cache.get::<usize>("MSFT", Duration::from_secs(60)).is_some());
    }

    #[test]
    fn stats_reports_namespace_only() {
        let store = Arc::new(MemoryStore::unbounded());
        store.set("foreign", "ignored").expect("set");

        let cache = cache_over(store);
        cache.set("AAPL", &1usize, None);
        cache.set("MSFT", &2usize, None);

        let stats = cache.stats();
        assert_eq!(stats.count, 2);
        assert!(stats.size_kb > 0.0);
        assert!(stats.oldest.is_some());
    }

    #[test]
    fn corrupted_entry_reads_as_absent() {
        let store = Arc::new(MemoryStore::unbounded());
        store.set("news:AAPL", "{not json").expect("set");

        let shared: Arc<dyn KvStore> = store;
        let cache = cache_over(Arc::clone(&shared));
        assert_eq!(cache.get::<usize>("AAPL", Duration::from_secs(60)), None);
        assert!(shared.get("news:AAPL").is_none());
    }
}
