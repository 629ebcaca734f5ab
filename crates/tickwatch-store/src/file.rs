use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{KvStore, StoreError};

/// Store backed by a single JSON file.
///
/// The full key-value image lives in memory and is rewritten to disk on
/// every mutation via a sibling temp file and rename, so a crash mid-write
/// leaves the previous image intact. An optional byte capacity gives the
/// same quota semantics as [`crate::MemoryStore`].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
    capacity_bytes: Option<usize>,
}

impl FileStore {
    /// Open the store at `path`, loading any existing image.
    ///
    /// A missing file starts empty; a present but unreadable or malformed
    /// file is an error rather than silent data loss.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_capacity(path, None)
    }

    /// Open the store with a byte capacity over combined key+value sizes.
    pub fn open_with_capacity(
        path: impl Into<PathBuf>,
        capacity_bytes: Option<usize>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let map = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StoreError::Io(err)),
        };

        Ok(Self {
            path,
            map: Mutex::new(map),
            capacity_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn used_bytes(map: &BTreeMap<String, String>) -> usize {
        map.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let image = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, image)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let map = self.map.lock().expect("file store lock");
        map.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.map.lock().expect("file store lock");

        if let Some(capacity) = self.capacity_bytes {
            let replaced = map.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let projected = Self::used_bytes(&map) - replaced + key.len() + value.len();
            if projected > capacity {
                return Err(StoreError::QuotaExceeded {
                    needed: key.len() + value.len(),
                    available: capacity.saturating_sub(Self::used_bytes(&map) - replaced),
                });
            }
        }

        let previous = map.insert(key.to_owned(), value.to_owned());
        match self.persist(&map) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Roll the in-memory image back so memory and disk agree.
                match previous {
                    Some(old) => map.insert(key.to_owned(), old),
                    None => map.remove(key),
                };
                Err(err)
            }
        }
    }

    fn remove(&self, key: &str) {
        let mut map = self.map.lock().expect("file store lock");
        if map.remove(key).is_some() {
            // Best effort: a failed rewrite keeps the stale key on disk only.
            let _ = self.persist(&map);
        }
    }

    fn keys(&self) -> Vec<String> {
        let map = self.map.lock().expect("file store lock");
        map.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).expect("open");
            store.set("usage", "{\"daily_calls\":3}").expect("set");
        }

        let reopened = FileStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.get("usage"),
            Some(String::from("{\"daily_calls\":3}"))
        );
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path().join("absent.json")).expect("open");
        assert!(store.keys().is_empty());
    }

    #[test]
    fn malformed_image_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "not json").expect("write");

        let err = FileStore::open(&path).expect_err("malformed image must fail");
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn capacity_applies_like_memory_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open_with_capacity(dir.path().join("s.json"), Some(6))
            .expect("open");

        store.set("ab", "cd").expect("fits");
        let err = store.set("xy", "zwv").expect_err("does not fit");
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn remove_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).expect("open");
        store.set("k", "v").expect("set");
        store.remove("k");
        drop(store);

        let reopened = FileStore::open(&path).expect("reopen");
        assert!(reopened.get("k").is_none());
    }
}
