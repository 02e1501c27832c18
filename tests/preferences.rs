//! Integration tests for the preference layer over the SQLite store:
//! round-trips, degradation semantics, bookmark set operations, and the
//! cross-view change poller.
//!
//! Each test opens its own in-memory database for isolation.

use std::sync::Arc;
use std::time::Duration;

use biasbrief::prefs::{FontSize, PreferenceStore, Preferences, Theme};
use biasbrief::storage::{KeyValueStore, SqliteStore, StoreError};

async fn sqlite() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(":memory:").await.unwrap())
}

async fn prefs_over(store: Arc<SqliteStore>) -> PreferenceStore {
    PreferenceStore::new(store as Arc<dyn KeyValueStore>)
}

// ============================================================================
// Round Trips
// ============================================================================

#[tokio::test]
async fn test_full_record_round_trip() {
    let store = sqlite().await;
    let prefs = prefs_over(store).await;

    let record = Preferences {
        theme: Theme::Dark,
        default_bias_mode: false,
        font_size: FontSize::Large,
        card_size: 3,
        articles_per_page: 12,
        preferred_categories: vec!["Tech".to_string(), "World".to_string()],
        bookmarks: vec!["a1".to_string(), "a2".to_string()],
    };
    prefs.save_all(&record).await.unwrap();

    let loaded = prefs.load_all().await;
    assert_eq!(loaded.value, record);
    assert!(loaded.error.is_none());
}

#[tokio::test]
async fn test_preferences_survive_reopen() {
    let store = sqlite().await;

    {
        let prefs = prefs_over(Arc::clone(&store)).await;
        prefs.set_theme(Theme::Dark).await.unwrap();
        prefs.add_bookmark("kept").await.unwrap();
    }

    // A second store instance over the same database sees the writes.
    let prefs = prefs_over(store).await;
    assert_eq!(prefs.theme().await.value, Theme::Dark);
    assert!(prefs.is_bookmarked("kept").await);
}

#[tokio::test]
async fn test_getters_never_fail_on_empty_store() {
    let store = sqlite().await;
    let prefs = prefs_over(store).await;

    let all = prefs.load_all().await;
    assert_eq!(all.value, Preferences::default());
    assert!(all.error.is_none());
}

// ============================================================================
// Degradation
// ============================================================================

#[tokio::test]
async fn test_corrupt_collection_is_observed_and_recovered() {
    let store = sqlite().await;
    store.set("preferred_categories", "{broken").await.unwrap();
    let prefs = prefs_over(store).await;

    let categories = prefs.preferred_categories().await;
    assert!(categories.value.is_empty());
    assert!(matches!(categories.error, Some(StoreError::Parse(_))));

    // The batch read reports the same degradation once.
    let all = prefs.load_all().await;
    assert!(all.error.is_some());
    assert_eq!(all.value.preferred_categories, Vec::<String>::new());
}

#[tokio::test]
async fn test_bad_scalars_degrade_silently() {
    let store = sqlite().await;
    store.set("theme", "mauve").await.unwrap();
    store.set("articles_per_page", "-3").await.unwrap();
    store.set("card_size", "huge").await.unwrap();
    let prefs = prefs_over(store).await;

    let all = prefs.load_all().await;
    assert_eq!(all.value.theme, Theme::Light);
    assert_eq!(all.value.articles_per_page, 9);
    assert_eq!(all.value.card_size, 2);
    assert!(all.error.is_none());
}

// ============================================================================
// Bookmark Set Semantics
// ============================================================================

#[tokio::test]
async fn test_bookmark_membership_lifecycle() {
    let store = sqlite().await;
    let prefs = prefs_over(store).await;

    prefs.add_bookmark("a1").await.unwrap();
    assert!(prefs.is_bookmarked("a1").await);

    prefs.remove_bookmark("a1").await.unwrap();
    assert!(!prefs.is_bookmarked("a1").await);
}

#[tokio::test]
async fn test_double_add_leaves_set_unchanged() {
    let store = sqlite().await;
    let prefs = prefs_over(store).await;

    prefs.add_bookmark("a1").await.unwrap();
    prefs.add_bookmark("a1").await.unwrap();
    assert_eq!(prefs.bookmarks().await.value, vec!["a1".to_string()]);

    prefs.remove_bookmark("absent").await.unwrap();
    assert_eq!(prefs.bookmarks().await.value, vec!["a1".to_string()]);
}

// ============================================================================
// Cross-View Sync
// ============================================================================

#[tokio::test]
async fn test_poller_sees_write_from_second_store() {
    // Real time with a short poll interval: pausing the clock starves the
    // sqlx pool's own timeouts.
    let store = sqlite().await;
    let reader = PreferenceStore::with_poll_interval(
        Arc::clone(&store) as Arc<dyn KeyValueStore>,
        Duration::from_millis(25),
    );
    let writer = prefs_over(Arc::clone(&store)).await;

    let mut rx = reader.watch_preferred_categories(Vec::new());

    writer
        .set_preferred_categories(&["Politics".to_string()])
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("poller should observe the external write")
        .unwrap();
    assert_eq!(*rx.borrow(), vec!["Politics".to_string()]);
}
