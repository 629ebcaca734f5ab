use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{KvStore, StoreError};

#[derive(Debug, Default)]
struct MemoryInner {
    map: BTreeMap<String, String>,
    used_bytes: usize,
}

impl MemoryInner {
    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }
}

/// In-process store with an optional byte capacity.
///
/// The capacity models a quota-limited storage area: a `set` that would push
/// the total of key and value bytes past the capacity fails with
/// [`StoreError::QuotaExceeded`] without mutating the store.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    capacity_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create a store limited to `capacity_bytes` of combined key and value
    /// bytes.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    /// Create a store with no capacity limit.
    pub fn unbounded() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            capacity_bytes: None,
        }
    }

    /// Total key+value bytes currently held.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().expect("memory store lock").used_bytes
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock().expect("memory store lock");
        inner.map.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");

        let incoming = MemoryInner::entry_size(key, value);
        let replaced = inner
            .map
            .get(key)
            .map(|existing| MemoryInner::entry_size(key, existing))
            .unwrap_or(0);
        let projected = inner.used_bytes - replaced + incoming;

        if let Some(capacity) = self.capacity_bytes {
            if projected > capacity {
                return Err(StoreError::QuotaExceeded {
                    needed: incoming,
                    available: capacity.saturating_sub(inner.used_bytes - replaced),
                });
            }
        }

        inner.map.insert(key.to_owned(), value.to_owned());
        inner.used_bytes = projected;
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().expect("memory store lock");
        if let Some(existing) = inner.map.remove(key) {
            inner.used_bytes -= MemoryInner::entry_size(key, &existing);
        }
    }

    fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("memory store lock");
        inner.map.keys().cloned().collect()
    }
}
