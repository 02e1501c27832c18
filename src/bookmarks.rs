//! Bookmark subsystem: set semantics over the preference store.
use std::collections::HashSet;
use std::sync::Arc;

use crate::article::ArticleId;
use crate::prefs::PreferenceStore;
use crate::storage::StoreError;

/// Bookmark membership and toggling, persisted through the preference store.
///
/// This is a derived view, not a second source of truth: every operation
/// reads or writes the store's `bookmarks` field directly.
#[derive(Clone)]
pub struct Bookmarks {
    prefs: Arc<PreferenceStore>,
}

impl Bookmarks {
    pub fn new(prefs: Arc<PreferenceStore>) -> Self {
        Self { prefs }
    }

    pub async fn is_bookmarked(&self, id: &ArticleId) -> bool {
        self.prefs.is_bookmarked(id.as_str()).await
    }

    /// The current membership set. A corrupt stored list recovers to empty.
    pub async fn ids(&self) -> HashSet<String> {
        self.prefs.bookmarks().await.value.into_iter().collect()
    }

    /// Flip membership; returns the new state (`true` = now bookmarked).
    pub async fn toggle(&self, id: &ArticleId) -> Result<bool, StoreError> {
        if self.is_bookmarked(id).await {
            self.prefs.remove_bookmark(id.as_str()).await?;
            Ok(false)
        } else {
            self.prefs.add_bookmark(id.as_str()).await?;
            Ok(true)
        }
    }
}
