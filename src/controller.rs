//! Feed controller: owns all filter/sort/page state, decides fetch-vs-cache,
//! and derives the displayed article list.
//!
//! Fetches run as spawned tasks that deliver [`FeedEvent`]s back through an
//! internal channel. Every fetch is stamped with a generation number taken
//! when it is spawned; [`FeedController::handle_event`] rejects results whose
//! generation is no longer current, so a slow superseded response can never
//! overwrite the state of a newer request (user flips category twice, first
//! response arrives last).
//!
//! The adopted working set may be either one server-produced page or a full
//! client-held set (a source is free to ignore pagination hints, and the
//! bookmarks view always fetches unwindowed). `view()` handles both: local
//! windowing applies only when the filtered set exceeds one page, and the
//! page count prefers the server's total when the server clearly holds more
//! than was adopted.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use crate::article::{Article, ArticleId};
use crate::bookmarks::Bookmarks;
use crate::cache::{CachedPage, FeedCache, FeedKey, DEFAULT_CAPACITY};
use crate::derive::{
    clamp_page, filter_and_sort, total_pages, FeedState, SortOrder, ALL_CATEGORIES,
};
use crate::prefs::PreferenceStore;
use crate::remote::{ArticleQuery, ArticleSource, FetchError, FetchedPage};
use crate::storage::StoreError;

// ============================================================================
// Events
// ============================================================================

/// Results delivered by background tasks.
pub enum FeedEvent {
    /// A page fetch completed.
    ///
    /// `key` is `Some` for cacheable main-view fetches and `None` for the
    /// bookmarks view (which bypasses the cache).
    PageLoaded {
        generation: u64,
        key: Option<FeedKey>,
        result: Result<FetchedPage, FetchError>,
    },
    /// The category vocabulary arrived.
    CategoriesLoaded {
        result: Result<Vec<String>, FetchError>,
    },
    /// Debias trigger plus re-fetch completed for one article.
    ///
    /// `Ok(None)` means the trigger succeeded but the re-query no longer
    /// found the article.
    DebiasApplied {
        id: ArticleId,
        result: Result<Option<Article>, FetchError>,
    },
}

// ============================================================================
// View Snapshot
// ============================================================================

/// Observable state handed to the rendering layer.
#[derive(Debug, Clone)]
pub struct FeedView {
    pub articles: Vec<Article>,
    pub total_count: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub is_loading: bool,
    /// Recoverable-error notice for display; cleared by the next successful
    /// fetch.
    pub last_error: Option<String>,
}

// ============================================================================
// FeedController
// ============================================================================

pub struct FeedController {
    source: Arc<dyn ArticleSource>,
    prefs: Arc<PreferenceStore>,
    bookmarks: Bookmarks,
    cache: FeedCache,

    state: FeedState,
    /// Adopted working set; `Arc` so cache entries and view snapshots share
    /// storage with it.
    articles: Arc<Vec<Article>>,
    /// Server-side total for the adopted set.
    remote_total: usize,
    /// Local mirror of the bookmark id set, refreshed on init and kept in
    /// sync by `toggle_bookmark`.
    bookmark_ids: HashSet<String>,
    /// Category vocabulary, `"All"` first.
    categories: Vec<String>,

    is_loading: bool,
    last_error: Option<String>,

    /// Stamp of the most recently spawned fetch; results carrying any other
    /// value are stale and dropped.
    generation: u64,

    events_tx: mpsc::UnboundedSender<FeedEvent>,
    events_rx: mpsc::UnboundedReceiver<FeedEvent>,

    /// `(category, page)` saved when entering the bookmarks view.
    previous_view: Option<(String, usize)>,

    /// Externally changed preferred categories arrive here (another open
    /// view of the same session writing through the shared store).
    prefs_watch: Option<watch::Receiver<Vec<String>>>,
}

impl FeedController {
    pub fn new(source: Arc<dyn ArticleSource>, prefs: Arc<PreferenceStore>) -> Self {
        Self::with_cache_capacity(source, prefs, DEFAULT_CAPACITY)
    }

    pub fn with_cache_capacity(
        source: Arc<dyn ArticleSource>,
        prefs: Arc<PreferenceStore>,
        cache_capacity: usize,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bookmarks = Bookmarks::new(Arc::clone(&prefs));
        Self {
            source,
            prefs,
            bookmarks,
            cache: FeedCache::new(cache_capacity),
            state: FeedState::default(),
            articles: Arc::new(Vec::new()),
            remote_total: 0,
            bookmark_ids: HashSet::new(),
            categories: vec![ALL_CATEGORIES.to_string()],
            is_loading: false,
            last_error: None,
            generation: 0,
            events_tx,
            events_rx,
            previous_view: None,
            prefs_watch: None,
        }
    }

    /// Seed session state from the preference store and start watching for
    /// external preference changes. A degraded preference read surfaces as a
    /// non-fatal notice, never a failure.
    pub async fn init(&mut self) {
        let loaded = self.prefs.load_all().await;
        if let Some(e) = &loaded.error {
            tracing::warn!(error = %e, "Preferences degraded to defaults");
            self.last_error = Some(format!("Settings could not be fully loaded: {e}"));
        }

        self.state.articles_per_page = loaded.value.articles_per_page.max(1) as usize;
        self.state.preferred_categories = loaded.value.preferred_categories;
        self.state.custom_feed = !self.state.preferred_categories.is_empty();
        self.bookmark_ids = loaded.value.bookmarks.into_iter().collect();

        self.prefs_watch = Some(
            self.prefs
                .watch_preferred_categories(self.state.preferred_categories.clone()),
        );
    }

    // ========================================================================
    // State Mutators
    // ========================================================================

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// True while a spawned fetch is outstanding. `fetch_page` can also
    /// complete synchronously (cache hit, empty bookmark set), in which case
    /// there is no event to wait for.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Select a category. Session-local — never persisted — and the page
    /// resets so a stale page number from the previous category cannot leak
    /// into the new one.
    pub fn set_category(&mut self, category: impl Into<String>) {
        self.state.selected_category = category.into();
        self.state.current_page = 1;
    }

    /// Set the search query. Whitespace-only is equivalent to no filter.
    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.state.search_query = query.into();
        self.state.current_page = 1;
    }

    /// Change sort order. The client-held set resorts in place (derivation
    /// sorts on every view); a subsequent fetch carries the order in both
    /// the request and the cache key.
    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.state.sort_order = order;
    }

    /// Change the page size; the current page clamps to the new maximum.
    pub fn set_articles_per_page(&mut self, per_page: usize) {
        self.state.articles_per_page = per_page.max(1);
        let pages = total_pages(self.effective_total(), self.state.articles_per_page);
        self.state.current_page = clamp_page(self.state.current_page, pages);
    }

    /// Toggle personalized-feed mode (preferred categories, active with the
    /// `"All"` selection).
    pub fn set_custom_feed(&mut self, enabled: bool) {
        self.state.custom_feed = enabled;
        self.state.current_page = 1;
    }

    /// Enter or leave the bookmarks-only view. Entering saves the active
    /// category/page; leaving restores them.
    pub fn set_bookmarks_only(&mut self, enabled: bool) {
        if enabled == self.state.show_bookmarks_only {
            return;
        }
        if enabled {
            self.previous_view = Some((
                self.state.selected_category.clone(),
                self.state.current_page,
            ));
            self.state.show_bookmarks_only = true;
        } else {
            self.state.show_bookmarks_only = false;
            if let Some((category, page)) = self.previous_view.take() {
                self.state.selected_category = category;
                self.state.current_page = page;
            }
        }
    }

    /// Jump to a page, clamped into `[1, total_pages]`.
    pub fn go_to_page(&mut self, page: usize) {
        let pages = total_pages(self.effective_total(), self.state.articles_per_page);
        self.state.current_page = clamp_page(page, pages);
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Load articles for the current state: adopt a cached page when the key
    /// matches exactly, otherwise spawn a fetch against the source. The
    /// result (or failure) arrives as a [`FeedEvent`].
    pub fn fetch_page(&mut self) {
        if self.state.show_bookmarks_only {
            self.fetch_bookmarked();
            return;
        }

        let key = FeedKey::from_state(&self.state);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "Cache hit, adopting without fetch");
            self.articles = Arc::clone(&hit.articles);
            self.remote_total = hit.total_count;
            self.is_loading = false;
            self.last_error = None;
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.is_loading = true;

        let query = self.query_for_state();
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        tracing::debug!(key = %key, generation, "Spawning article fetch");
        tokio::spawn(async move {
            let result = source.query(&query).await;
            let _ = tx.send(FeedEvent::PageLoaded {
                generation,
                key: Some(key),
                result,
            });
        });
    }

    /// Bookmarks view: fetch exactly the bookmarked id set, unwindowed,
    /// bypassing the page cache. An empty set adopts an empty list without
    /// touching the network.
    fn fetch_bookmarked(&mut self) {
        let mut ids: Vec<ArticleId> = self
            .bookmark_ids
            .iter()
            .map(|id| ArticleId::new(id))
            .collect();
        ids.sort_unstable();

        if ids.is_empty() {
            self.articles = Arc::new(Vec::new());
            self.remote_total = 0;
            self.is_loading = false;
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.is_loading = true;

        let query = ArticleQuery {
            page: 1,
            page_size: ids.len(),
            sort: self.state.sort_order,
            category: None,
            search: None,
            ids: Some(ids),
        };
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = source.query(&query).await;
            let _ = tx.send(FeedEvent::PageLoaded {
                generation,
                key: None,
                result,
            });
        });
    }

    /// Refresh the category vocabulary from the source.
    pub fn refresh_categories(&mut self) {
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = source.list_categories().await;
            let _ = tx.send(FeedEvent::CategoriesLoaded { result });
        });
    }

    /// Trigger the two-step debias protocol for an article in the working
    /// set: fire the debias endpoint, then re-query by id for the persisted
    /// unbiased title. A failure leaves the biased title in place.
    pub fn request_debias(&mut self, id: &ArticleId) {
        let Some(article) = self.articles.iter().find(|a| a.id == *id) else {
            tracing::debug!(id = %id, "Debias requested for article not in working set");
            return;
        };
        let biased_title = article.title_biased.to_string();
        let id = id.clone();
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let result = match source.debias(&id, &biased_title).await {
                Ok(()) => {
                    let query = ArticleQuery {
                        page: 1,
                        page_size: 1,
                        ids: Some(vec![id.clone()]),
                        ..ArticleQuery::default()
                    };
                    source
                        .query(&query)
                        .await
                        .map(|page| page.articles.into_iter().next())
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(FeedEvent::DebiasApplied { id, result });
        });
    }

    /// Coarse server-side narrowing for the current state. Finer filtering
    /// (preferred categories, local re-search, windowing of full sets)
    /// happens in the derivation pipeline.
    fn query_for_state(&self) -> ArticleQuery {
        let category = if self.state.selected_category == ALL_CATEGORIES {
            None
        } else {
            Some(self.state.selected_category.clone())
        };
        let search = {
            let q = self.state.search_query.trim();
            (!q.is_empty()).then(|| q.to_string())
        };
        ArticleQuery {
            page: self.state.current_page,
            page_size: self.state.articles_per_page,
            sort: self.state.sort_order,
            category,
            search,
            ids: None,
        }
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    pub fn is_bookmarked(&self, id: &ArticleId) -> bool {
        self.bookmark_ids.contains(id.as_str())
    }

    /// Flip bookmark membership, persisting through the preference store.
    ///
    /// When the set becomes empty while the bookmarks-only view is active,
    /// the view turns itself off and the previous category/page view is
    /// restored — an empty bookmarks view would otherwise be a dead end.
    pub async fn toggle_bookmark(&mut self, id: &ArticleId) -> Result<bool, StoreError> {
        let bookmarked = self.bookmarks.toggle(id).await?;
        if bookmarked {
            self.bookmark_ids.insert(id.as_str().to_string());
        } else {
            self.bookmark_ids.remove(id.as_str());
        }

        if !bookmarked && self.state.show_bookmarks_only && self.bookmark_ids.is_empty() {
            tracing::debug!("Bookmark set emptied, leaving bookmarks view");
            self.set_bookmarks_only(false);
            self.fetch_page();
        }
        Ok(bookmarked)
    }

    // ========================================================================
    // Event Handling
    // ========================================================================

    /// Drain pending background results and external preference changes
    /// without blocking. Returns the number of events applied.
    pub fn poll_events(&mut self) -> usize {
        self.check_preferred_watch();
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Await and apply the next background result. Intended for drivers
    /// that just issued a fetch and want its completion.
    pub async fn next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
        self.check_preferred_watch();
    }

    /// Apply one background result to controller state.
    pub fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::PageLoaded {
                generation,
                key,
                result,
            } => {
                if generation != self.generation {
                    tracing::debug!(
                        got = generation,
                        current = self.generation,
                        "Discarding stale fetch result"
                    );
                    return;
                }
                self.is_loading = false;
                match result {
                    Ok(page) => {
                        let articles = Arc::new(page.articles);
                        self.remote_total = page.total_count;
                        self.articles = Arc::clone(&articles);
                        self.last_error = None;

                        if let Some(key) = key {
                            let per_page = self.state.articles_per_page;
                            self.cache.insert(
                                key,
                                CachedPage {
                                    articles,
                                    page: self.state.current_page,
                                    total_pages: total_pages(page.total_count, per_page),
                                    total_count: page.total_count,
                                    state: self.state.clone(),
                                    inserted_at: Instant::now(),
                                },
                            );
                        }
                    }
                    Err(e) => {
                        // Last-good list stays visible; a retry happens only
                        // when a later user action re-invokes fetch_page.
                        tracing::warn!(error = %e, "Article fetch failed, keeping last-good list");
                        self.last_error = Some(e.to_string());
                    }
                }
            }
            FeedEvent::CategoriesLoaded { result } => match result {
                Ok(mut list) => {
                    if !list.iter().any(|c| c == ALL_CATEGORIES) {
                        list.insert(0, ALL_CATEGORIES.to_string());
                    }
                    self.categories = list;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Category list fetch failed, keeping previous list");
                    self.last_error = Some(e.to_string());
                }
            },
            FeedEvent::DebiasApplied { id, result } => match result {
                Ok(Some(updated)) => self.adopt_debiased(updated),
                Ok(None) => {
                    tracing::debug!(id = %id, "Debiased article no longer present at source");
                }
                Err(e) => {
                    // Biased title stays on display; the notice is transient.
                    tracing::warn!(id = %id, error = %e, "Debias failed, keeping biased title");
                    self.last_error = Some(format!("Headline could not be unbiased: {e}"));
                }
            },
        }
    }

    /// Splice a re-fetched article into the working set and refresh the
    /// cached entry for the current key so the rewrite survives a later
    /// cache hit.
    fn adopt_debiased(&mut self, updated: Article) {
        let Some(position) = self.articles.iter().position(|a| a.id == updated.id) else {
            tracing::debug!(id = %updated.id, "Debiased article left the working set, dropping");
            return;
        };

        let mut list = (*self.articles).clone();
        list[position] = updated;
        self.articles = Arc::new(list);

        if !self.state.show_bookmarks_only {
            let key = FeedKey::from_state(&self.state);
            if self.cache.get(&key).is_some() {
                let per_page = self.state.articles_per_page;
                self.cache.insert(
                    key,
                    CachedPage {
                        articles: Arc::clone(&self.articles),
                        page: self.state.current_page,
                        total_pages: total_pages(self.remote_total, per_page),
                        total_count: self.remote_total,
                        state: self.state.clone(),
                        inserted_at: Instant::now(),
                    },
                );
            }
        }
    }

    /// Adopt preferred-category changes written by another view of the same
    /// session (observed through the preference store's watch channel).
    fn check_preferred_watch(&mut self) {
        let Some(rx) = &mut self.prefs_watch else {
            return;
        };
        if rx.has_changed().unwrap_or(false) {
            let categories = rx.borrow_and_update().clone();
            tracing::info!(
                count = categories.len(),
                "Preferred categories changed externally, resynchronizing"
            );
            self.state.preferred_categories = categories;
            if self.state.custom_feed && self.state.selected_category == ALL_CATEGORIES {
                self.state.current_page = 1;
            }
        }
    }

    // ========================================================================
    // Derivation
    // ========================================================================

    /// Derive the observable snapshot for the current state.
    ///
    /// Also adopts the clamped page so the state invariant
    /// `current_page <= total_pages` holds after list-shrinking mutations.
    pub fn view(&mut self) -> FeedView {
        let filtered = filter_and_sort(&self.articles, &self.state, &self.bookmark_ids);

        if self.state.show_bookmarks_only {
            return FeedView {
                total_count: filtered.len(),
                total_pages: 1,
                current_page: 1,
                articles: filtered,
                is_loading: self.is_loading,
                last_error: self.last_error.clone(),
            };
        }

        let per_page = self.state.articles_per_page.max(1);
        let total_count = self.effective_total_for(filtered.len());
        let pages = total_pages(total_count, per_page);
        let page = clamp_page(self.state.current_page, pages);
        self.state.current_page = page;

        // A set no larger than one page IS the window (the source already
        // paginated); a larger set is client-held and windows locally.
        let articles = if filtered.len() > per_page {
            filtered
                .into_iter()
                .skip((page - 1) * per_page)
                .take(per_page)
                .collect()
        } else {
            filtered
        };

        FeedView {
            articles,
            total_count,
            total_pages: pages,
            current_page: page,
            is_loading: self.is_loading,
            last_error: self.last_error.clone(),
        }
    }

    fn effective_total(&self) -> usize {
        let filtered = filter_and_sort(&self.articles, &self.state, &self.bookmark_ids);
        self.effective_total_for(filtered.len())
    }

    /// The server's total wins only when it clearly holds more than was
    /// adopted (a windowed response); a full client-held set counts itself.
    fn effective_total_for(&self, filtered_len: usize) -> usize {
        if self.articles.len() < self.remote_total {
            self.remote_total.max(filtered_len)
        } else {
            filtered_len
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
