//! Typed preference store over durable key-value storage.
//!
//! Every getter has a hardcoded default and never fails: a missing key, an
//! unknown enum token, or a garbled number silently degrades to the default,
//! while structural corruption (a serialized collection that no longer
//! parses) and backend unavailability recover to the default *and* report
//! the failure through [`Recovered::error`], so callers can observe that
//! recovery happened. Writes return a plain `Result`; a failed write leaves
//! the caller's in-memory value authoritative for the session.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::storage::{KeyValueStore, StoreError};

// ============================================================================
// Preference Keys
// ============================================================================

const KEY_THEME: &str = "theme";
const KEY_DEFAULT_BIAS_MODE: &str = "default_bias_mode";
const KEY_FONT_SIZE: &str = "font_size";
const KEY_CARD_SIZE: &str = "card_size";
const KEY_ARTICLES_PER_PAGE: &str = "articles_per_page";
const KEY_PREFERRED_CATEGORIES: &str = "preferred_categories";
const KEY_BOOKMARKS: &str = "bookmarks";

// ============================================================================
// Preference Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl FontSize {
    pub fn as_str(self) -> &'static str {
        match self {
            FontSize::Small => "small",
            FontSize::Medium => "medium",
            FontSize::Large => "large",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "small" => Some(FontSize::Small),
            "medium" => Some(FontSize::Medium),
            "large" => Some(FontSize::Large),
            _ => None,
        }
    }
}

/// The full preference record, with the hardcoded defaults every getter
/// degrades to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub theme: Theme,
    /// `true` = biased headlines shown by default.
    pub default_bias_mode: bool,
    pub font_size: FontSize,
    /// Card layout density knob.
    pub card_size: u32,
    pub articles_per_page: u32,
    /// Membership set; stored as a JSON array.
    pub preferred_categories: Vec<String>,
    /// Article ids, as strings; stored as a JSON array.
    pub bookmarks: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            default_bias_mode: true,
            font_size: FontSize::default(),
            card_size: 2,
            articles_per_page: 9,
            preferred_categories: Vec::new(),
            bookmarks: Vec::new(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// A preference read that always carries a usable value.
///
/// `error` is `None` for clean reads and for silent degradations (missing
/// key, bad scalar); it is `Some` when the store was unavailable or a
/// serialized collection was corrupt, so the caller can notify without
/// losing the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered<T> {
    pub value: T,
    pub error: Option<StoreError>,
}

impl<T> Recovered<T> {
    fn clean(value: T) -> Self {
        Self { value, error: None }
    }

    fn degraded(value: T, error: StoreError) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }
}

/// A batch save failure, attributed to the first field that failed.
///
/// Fields are written in record order and the batch stops at the first
/// failure, so everything before `field` is applied and everything from
/// `field` on is not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to save preference '{field}': {source}")]
pub struct SaveError {
    pub field: &'static str,
    #[source]
    pub source: StoreError,
}

// ============================================================================
// PreferenceStore
// ============================================================================

pub struct PreferenceStore {
    store: Arc<dyn KeyValueStore>,
    poll_interval: Duration,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_poll_interval(store, Duration::from_secs(1))
    }

    /// The poll interval governs how quickly an externally written
    /// preference change is observed; around one second is plenty.
    pub fn with_poll_interval(store: Arc<dyn KeyValueStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
            pollers: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Typed Accessors
    // ========================================================================

    pub async fn theme(&self) -> Recovered<Theme> {
        self.read_token(KEY_THEME, Theme::parse, Theme::default()).await
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<(), StoreError> {
        self.store.set(KEY_THEME, theme.as_str()).await
    }

    pub async fn default_bias_mode(&self) -> Recovered<bool> {
        self.read_token(KEY_DEFAULT_BIAS_MODE, |s| s.parse().ok(), true)
            .await
    }

    pub async fn set_default_bias_mode(&self, biased: bool) -> Result<(), StoreError> {
        self.store
            .set(KEY_DEFAULT_BIAS_MODE, if biased { "true" } else { "false" })
            .await
    }

    pub async fn font_size(&self) -> Recovered<FontSize> {
        self.read_token(KEY_FONT_SIZE, FontSize::parse, FontSize::default())
            .await
    }

    pub async fn set_font_size(&self, size: FontSize) -> Result<(), StoreError> {
        self.store.set(KEY_FONT_SIZE, size.as_str()).await
    }

    pub async fn card_size(&self) -> Recovered<u32> {
        self.read_token(KEY_CARD_SIZE, |s| s.parse().ok(), 2).await
    }

    pub async fn set_card_size(&self, size: u32) -> Result<(), StoreError> {
        self.store.set(KEY_CARD_SIZE, &size.to_string()).await
    }

    pub async fn articles_per_page(&self) -> Recovered<u32> {
        // Zero is outside the allowed range and degrades like any bad scalar.
        self.read_token(
            KEY_ARTICLES_PER_PAGE,
            |s| s.parse().ok().filter(|&n: &u32| n > 0),
            9,
        )
        .await
    }

    pub async fn set_articles_per_page(&self, per_page: u32) -> Result<(), StoreError> {
        self.store
            .set(KEY_ARTICLES_PER_PAGE, &per_page.to_string())
            .await
    }

    pub async fn preferred_categories(&self) -> Recovered<Vec<String>> {
        self.read_list(KEY_PREFERRED_CATEGORIES).await
    }

    pub async fn set_preferred_categories(&self, categories: &[String]) -> Result<(), StoreError> {
        self.write_list(KEY_PREFERRED_CATEGORIES, categories).await
    }

    pub async fn bookmarks(&self) -> Recovered<Vec<String>> {
        self.read_list(KEY_BOOKMARKS).await
    }

    pub async fn set_bookmarks(&self, bookmarks: &[String]) -> Result<(), StoreError> {
        self.write_list(KEY_BOOKMARKS, bookmarks).await
    }

    // ========================================================================
    // Bookmark Set Helpers
    // ========================================================================

    /// Add an article id to the bookmark set. Idempotent: adding a present
    /// id is a no-op success with no write.
    pub async fn add_bookmark(&self, id: &str) -> Result<(), StoreError> {
        let mut bookmarks = self.bookmarks().await.value;
        if bookmarks.iter().any(|b| b == id) {
            return Ok(());
        }
        bookmarks.push(id.to_string());
        self.write_list(KEY_BOOKMARKS, &bookmarks).await
    }

    /// Remove an article id from the bookmark set. Idempotent: removing an
    /// absent id is a no-op success with no write.
    pub async fn remove_bookmark(&self, id: &str) -> Result<(), StoreError> {
        let mut bookmarks = self.bookmarks().await.value;
        let before = bookmarks.len();
        bookmarks.retain(|b| b != id);
        if bookmarks.len() == before {
            return Ok(());
        }
        self.write_list(KEY_BOOKMARKS, &bookmarks).await
    }

    pub async fn is_bookmarked(&self, id: &str) -> bool {
        self.bookmarks().await.value.iter().any(|b| b == id)
    }

    // ========================================================================
    // Batch Operations
    // ========================================================================

    /// Load the whole record. Composes from the per-field reads; the first
    /// observed degradation error is retained so batch callers can notify
    /// once.
    pub async fn load_all(&self) -> Recovered<Preferences> {
        let theme = self.theme().await;
        let default_bias_mode = self.default_bias_mode().await;
        let font_size = self.font_size().await;
        let card_size = self.card_size().await;
        let articles_per_page = self.articles_per_page().await;
        let preferred_categories = self.preferred_categories().await;
        let bookmarks = self.bookmarks().await;

        let error = [
            theme.error.clone(),
            default_bias_mode.error.clone(),
            font_size.error.clone(),
            card_size.error.clone(),
            articles_per_page.error.clone(),
            preferred_categories.error.clone(),
            bookmarks.error.clone(),
        ]
        .into_iter()
        .flatten()
        .next();

        Recovered {
            value: Preferences {
                theme: theme.value,
                default_bias_mode: default_bias_mode.value,
                font_size: font_size.value,
                card_size: card_size.value,
                articles_per_page: articles_per_page.value,
                preferred_categories: preferred_categories.value,
                bookmarks: bookmarks.value,
            },
            error,
        }
    }

    /// Persist the whole record, field by field in declaration order,
    /// stopping at the first failure. The returned error names the failing
    /// field, so the caller knows exactly how much of the batch applied.
    pub async fn save_all(&self, prefs: &Preferences) -> Result<(), SaveError> {
        let attribute = |field| move |source| SaveError { field, source };

        self.set_theme(prefs.theme).await.map_err(attribute("theme"))?;
        self.set_default_bias_mode(prefs.default_bias_mode)
            .await
            .map_err(attribute("default_bias_mode"))?;
        self.set_font_size(prefs.font_size)
            .await
            .map_err(attribute("font_size"))?;
        self.set_card_size(prefs.card_size)
            .await
            .map_err(attribute("card_size"))?;
        self.set_articles_per_page(prefs.articles_per_page)
            .await
            .map_err(attribute("articles_per_page"))?;
        self.set_preferred_categories(&prefs.preferred_categories)
            .await
            .map_err(attribute("preferred_categories"))?;
        self.set_bookmarks(&prefs.bookmarks)
            .await
            .map_err(attribute("bookmarks"))?;
        Ok(())
    }

    // ========================================================================
    // Change Notification
    // ========================================================================

    /// Watch `preferred_categories` for changes made through any handle of
    /// the same underlying store (another open view of the session included).
    ///
    /// A background poller samples the store on `poll_interval` and publishes
    /// on change. Polling lives behind this interface so a push-capable
    /// backend could replace it without touching subscribers. The poller is
    /// aborted when the store is dropped.
    pub fn watch_preferred_categories(&self, initial: Vec<String>) -> watch::Receiver<Vec<String>> {
        let (tx, rx) = watch::channel(initial);
        let store = Arc::clone(&self.store);
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let raw = match store.get(KEY_PREFERRED_CATEGORIES).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::debug!(error = %e, "Preference poll failed, will retry");
                        continue;
                    }
                };
                let current: Vec<String> = match raw {
                    None => Vec::new(),
                    Some(json) => match serde_json::from_str(&json) {
                        Ok(list) => list,
                        // Corrupt value: hold the last-known-good list.
                        Err(_) => continue,
                    },
                };
                tx.send_if_modified(|known| {
                    if *known != current {
                        *known = current;
                        true
                    } else {
                        false
                    }
                });
            }
            tracing::debug!("Preference poller stopped (no subscribers)");
        });

        if let Ok(mut pollers) = self.pollers.lock() {
            pollers.push(handle);
        }

        rx
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    /// Read a scalar/enum field. Missing keys and unparsable tokens degrade
    /// silently; an unavailable backend degrades with the error recorded.
    async fn read_token<T, F>(&self, key: &str, parse: F, default: T) -> Recovered<T>
    where
        F: Fn(&str) -> Option<T>,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match parse(&raw) {
                Some(value) => Recovered::clean(value),
                None => {
                    tracing::debug!(key = %key, value = %raw, "Invalid stored preference, using default");
                    Recovered::clean(default)
                }
            },
            Ok(None) => Recovered::clean(default),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Preference read failed, using default");
                Recovered::degraded(default, e)
            }
        }
    }

    /// Read a JSON-array field. Structural corruption recovers to an empty
    /// list with the parse error recorded — the one read failure callers are
    /// expected to observe.
    async fn read_list(&self, key: &str) -> Recovered<Vec<String>> {
        match self.store.get(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(list) => Recovered::clean(list),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Corrupt stored collection, recovering to empty");
                    Recovered::degraded(
                        Vec::new(),
                        StoreError::Parse(format!("{key}: {e}")),
                    )
                }
            },
            Ok(None) => Recovered::clean(Vec::new()),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Preference read failed, using default");
                Recovered::degraded(Vec::new(), e)
            }
        }
    }

    async fn write_list(&self, key: &str, list: &[String]) -> Result<(), StoreError> {
        let json = serde_json::to_string(list)
            .map_err(|e| StoreError::Parse(format!("{key}: {e}")))?;
        self.store.set(key, &json).await
    }
}

impl Drop for PreferenceStore {
    fn drop(&mut self) {
        if let Ok(mut pollers) = self.pollers.lock() {
            for handle in pollers.drain(..) {
                handle.abort();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
