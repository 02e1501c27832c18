//! Durable key-value surface: the preference store's sole dependency.
//!
//! The contract is deliberately small — string keys, string values, no
//! transactions — because that is all the preference layer needs and it keeps
//! backends trivially swappable (SQLite for real use, in-memory for tests).
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage failures. All of these are recoverable: readers degrade to
/// defaults, writers surface a non-fatal notification upstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected a write for lack of space.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A stored value is not valid for its declared type.
    #[error("stored value is not valid for its type: {0}")]
    Parse(String),

    /// The backing store is absent, locked, or otherwise unusable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// KeyValueStore Trait
// ============================================================================

/// String-keyed, string-valued durable storage.
///
/// Implementations must be safe to share across tasks; writes from one
/// handle must be visible to subsequent reads from another handle of the
/// same underlying store (that visibility is what the preference poller
/// relies on).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-process store for tests and ephemeral sessions.
///
/// An optional byte quota (total of all keys and values) makes the
/// `QuotaExceeded` path exercisable, and `set_unavailable` simulates a
/// disabled storage API.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Store with a total-size quota in bytes.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::new()
        }
    }

    /// Toggle simulated backend unavailability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage disabled".to_string()));
        }
        Ok(())
    }

    fn used_bytes(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if let Some(quota) = self.quota_bytes {
            let existing = entries.get(key).map_or(0, |v| key.len() + v.len());
            let prospective = Self::used_bytes(&entries) - existing + key.len() + value.len();
            if prospective > quota {
                return Err(StoreError::QuotaExceeded(format!(
                    "{prospective} bytes needed, {quota} available"
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_get_remove_round_trip() {
        let store = MemoryStore::new();
        store.set("theme", "dark").await.unwrap();
        assert_eq!(store.get("theme").await.unwrap().as_deref(), Some("dark"));

        store.remove("theme").await.unwrap();
        assert_eq!(store.get("theme").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_absent_key_is_ok() {
        let store = MemoryStore::new();
        store.remove("never-set").await.unwrap();
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(16);
        store.set("k", "small").await.unwrap();

        let err = store
            .set("big", &"x".repeat(64))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded(_)));

        // The earlier value survives the rejected write.
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("small"));
    }

    #[tokio::test]
    async fn test_quota_allows_overwrite_within_limit() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "aaaa").await.unwrap();
        // Overwriting frees the old value's bytes first.
        store.set("k", "bbbbb").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("bbbbb"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_all_ops() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.get("k").await.unwrap_err(),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            store.set("k", "v").await.unwrap_err(),
            StoreError::Unavailable(_)
        ));

        store.set_unavailable(false);
        store.set("k", "v").await.unwrap();
    }
}
