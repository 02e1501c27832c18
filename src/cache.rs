//! Memoization of fetched article pages, keyed by the exact filter state.
//!
//! Lookup is exact-match-or-nothing: two field-for-field-equal states always
//! produce the same key, and a difference in any field produces a different
//! key, so a stale page can never be served for a semantically different
//! request. The store is a bounded LRU owned by whoever constructs it —
//! never module-global state.
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::article::Article;
use crate::derive::FeedState;

pub const DEFAULT_CAPACITY: usize = 64;

// ============================================================================
// Cache Key
// ============================================================================

/// Deterministic identity of one filter/sort/page request.
///
/// Built from the canonical serialization of the state's key fields, with
/// `preferred_categories` sorted first so membership-equal sets serialize
/// identically regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    canonical: String,
}

/// Field order here is the canonical serialization order; changing it would
/// silently invalidate every existing key.
#[derive(Serialize)]
struct KeyFields<'a> {
    page: usize,
    category: &'a str,
    search: &'a str,
    per_page: usize,
    sort: &'a str,
    custom_feed: bool,
    preferred: Vec<&'a str>,
}

impl FeedKey {
    pub fn from_state(state: &FeedState) -> Self {
        let mut preferred: Vec<&str> = state
            .preferred_categories
            .iter()
            .map(String::as_str)
            .collect();
        preferred.sort_unstable();
        preferred.dedup();

        let fields = KeyFields {
            page: state.current_page,
            category: &state.selected_category,
            search: state.search_query.trim(),
            per_page: state.articles_per_page,
            sort: state.sort_order.as_str(),
            custom_feed: state.custom_feed,
            preferred,
        };

        // Struct fields serialize in declaration order, so the canonical
        // string is stable for equal states.
        let canonical = serde_json::to_string(&fields)
            .unwrap_or_else(|_| format!("{:?}", state));
        Self { canonical }
    }

    /// Short digest for logs and diagnostics.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.canonical.as_bytes());
        hash.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}

/// `Display` shows the digest, not the canonical body (which can embed a
/// user's search text).
impl std::fmt::Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest())
    }
}

// ============================================================================
// Cache Entry
// ============================================================================

/// One memoized page of results.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub articles: Arc<Vec<Article>>,
    pub page: usize,
    pub total_pages: usize,
    pub total_count: usize,
    /// Snapshot of the state the page was fetched for.
    pub state: FeedState,
    pub inserted_at: Instant,
}

// ============================================================================
// FeedCache
// ============================================================================

pub struct FeedCache {
    entries: LruCache<FeedKey, CachedPage>,
}

impl FeedCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Exact-key lookup. Never blocks, never fails; touches LRU recency.
    pub fn get(&mut self, key: &FeedKey) -> Option<&CachedPage> {
        self.entries.get(key)
    }

    /// Unconditional overwrite; last write wins. May evict the least
    /// recently used entry when at capacity.
    pub fn insert(&mut self, key: FeedKey, page: CachedPage) {
        if self.entries.put(key, page).is_none() && self.entries.len() == self.entries.cap().get() {
            tracing::trace!(capacity = self.entries.cap().get(), "Feed cache at capacity");
        }
    }

    pub fn remove(&mut self, key: &FeedKey) {
        self.entries.pop(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
