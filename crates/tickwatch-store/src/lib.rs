//! # Tickwatch Store
//!
//! Persistent key-value storage backends for tickwatch.
//!
//! ## Overview
//!
//! This crate provides the storage seam the tickwatch cache and usage
//! counters persist through: a small string-keyed, string-valued store with
//! enumerable keys and an explicit quota signal on write failure.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] — in-process map with an optional byte capacity, used
//!   for tests and for embedders that do not want durability.
//! - [`FileStore`] — a single JSON file image, rewritten atomically on every
//!   mutation. Suitable for the small namespaces tickwatch keeps (cache
//!   envelopes and usage counters), not for bulk data.
//!
//! ## Quick Start
//!
//! ```rust
//! use tickwatch_store::{KvStore, MemoryStore};
//!
//! let store = MemoryStore::unbounded();
//! store.set("greeting", "hello")?;
//! assert_eq!(store.get("greeting"), Some(String::from("hello")));
//! # Ok::<(), tickwatch_store::StoreError>(())
//! ```
//!
//! ## Concurrency
//!
//! Backends are `Send + Sync` and guard their state internally. A store
//! handle is owned by exactly one process: concurrent writers in separate
//! processes race last-write-wins, which the higher layers do not defend
//! against.

mod error;
mod file;
mod memory;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

/// String-keyed persistent store contract.
///
/// The interface mirrors a web-style local storage area: flat namespace,
/// string values, enumerable keys, and a [`StoreError::QuotaExceeded`]
/// signal when a write does not fit. Reads are infallible; a backend that
/// cannot read a key reports it as absent.
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QuotaExceeded`] when the write does not fit the
    /// backend's capacity, or [`StoreError::Io`] when the backend cannot
    /// persist the mutation.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key` from the store. Removing an absent key is a no-op.
    fn remove(&self, key: &str);

    /// Returns every key currently present, in unspecified order.
    fn keys(&self) -> Vec<String>;
}
