use thiserror::Error;

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would exceed the backend's capacity. Callers may evict and
    /// retry; the store itself never evicts.
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage image is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this failure is the capacity signal higher layers recover
    /// from by evicting old entries.
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
