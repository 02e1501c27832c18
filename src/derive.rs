//! Feed derivation: filtering, search, sort, and page windowing.
//!
//! Everything here is a pure function over a client-held article set and a
//! [`FeedState`]. The pipeline order is fixed — bookmarks source, preferred
//! source, category filter, search, sort, window — so two call sites can
//! never disagree about precedence.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::article::Article;

/// Sentinel category that disables the category filter.
pub const ALL_CATEGORIES: &str = "All";

// ============================================================================
// Sort Order
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    /// Most recent first.
    #[default]
    NewToOld,
    /// Oldest first.
    OldToNew,
}

impl SortOrder {
    /// Wire/storage token for this order.
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::NewToOld => "new-to-old",
            SortOrder::OldToNew => "old-to-new",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new-to-old" => Some(SortOrder::NewToOld),
            "old-to-new" => Some(SortOrder::OldToNew),
            _ => None,
        }
    }
}

// ============================================================================
// Filter / Pagination State
// ============================================================================

/// The feed controller's filter, sort, and pagination state.
///
/// Session-local; only `articles_per_page` and `preferred_categories` have
/// durable counterparts in the preference store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub search_query: String,
    /// `"All"` disables the filter.
    pub selected_category: String,
    /// Membership set; ordering is irrelevant.
    pub preferred_categories: Vec<String>,
    pub show_bookmarks_only: bool,
    /// Personalized-feed mode: with `selected_category == "All"`, restrict
    /// the source set to the preferred categories.
    pub custom_feed: bool,
    pub sort_order: SortOrder,
    /// Always >= 1.
    pub articles_per_page: usize,
    /// 1-based; clamped into `[1, total_pages]` at derivation time.
    pub current_page: usize,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            search_query: String::new(),
            selected_category: ALL_CATEGORIES.to_string(),
            preferred_categories: Vec::new(),
            show_bookmarks_only: false,
            custom_feed: false,
            sort_order: SortOrder::default(),
            articles_per_page: 9,
            current_page: 1,
        }
    }
}

// ============================================================================
// Derivation
// ============================================================================

/// Result of running the derivation pipeline over a source set.
#[derive(Debug, Clone)]
pub struct Derived {
    /// The visible window (or the whole filtered set in bookmarks view).
    pub articles: Vec<Article>,
    /// Filtered count before windowing.
    pub total_count: usize,
    /// Always >= 1; 1 in bookmarks view (no pagination controls).
    pub total_pages: usize,
    /// The clamped page actually shown.
    pub page: usize,
}

/// Page count for a filtered set: `max(1, ceil(count / per_page))`.
pub fn total_pages(count: usize, per_page: usize) -> usize {
    let per_page = per_page.max(1);
    count.div_ceil(per_page).max(1)
}

/// Clamp a 1-based page into `[1, total_pages]`.
pub fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.clamp(1, total_pages.max(1))
}

/// Pipeline steps 1-5: source-set selection, search, and sort — everything
/// except page windowing. Returns the full filtered set in display order.
pub fn filter_and_sort(
    articles: &[Article],
    state: &FeedState,
    bookmarks: &HashSet<String>,
) -> Vec<Article> {
    let query = state.search_query.trim();
    let preferred: HashSet<&str> = state
        .preferred_categories
        .iter()
        .map(String::as_str)
        .collect();

    let mut filtered: Vec<Article> = articles
        .iter()
        .filter(|a| {
            if state.show_bookmarks_only {
                bookmarks.contains(a.id.as_str())
            } else if state.custom_feed && state.selected_category == ALL_CATEGORIES {
                preferred.contains(&*a.category)
            } else if state.selected_category != ALL_CATEGORIES {
                *a.section == *state.selected_category
            } else {
                true
            }
        })
        .filter(|a| query.is_empty() || matches_query(a, query))
        .cloned()
        .collect();

    sort_articles(&mut filtered, state.sort_order);
    filtered
}

/// Run the full derivation pipeline.
///
/// `bookmarks` is consulted only when `state.show_bookmarks_only` is set.
/// Out-of-range `current_page` values are clamped, never an error; callers
/// that own the state should adopt the returned `page`.
pub fn derive(articles: &[Article], state: &FeedState, bookmarks: &HashSet<String>) -> Derived {
    let filtered = filter_and_sort(articles, state, bookmarks);
    let total_count = filtered.len();

    if state.show_bookmarks_only {
        // The bookmarks view shows the entire filtered set, unwindowed.
        return Derived {
            articles: filtered,
            total_count,
            total_pages: 1,
            page: 1,
        };
    }

    let pages = total_pages(total_count, state.articles_per_page);
    let page = clamp_page(state.current_page, pages);
    let start = (page - 1) * state.articles_per_page.max(1);
    let window: Vec<Article> = filtered
        .into_iter()
        .skip(start)
        .take(state.articles_per_page.max(1))
        .collect();

    Derived {
        articles: window,
        total_count,
        total_pages: pages,
        page,
    }
}

/// Case-insensitive substring match against both titles, snippet, and body.
pub fn matches_query(article: &Article, query: &str) -> bool {
    let needle = query.to_lowercase();
    [
        &article.title_biased,
        &article.title_unbiased,
        &article.snippet,
        &article.body,
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(&needle))
}

/// Stable sort by parsed publication time.
///
/// Unparsable dates (`published == None`) sort as earliest: last in
/// new-to-old order, first in old-to-new. Must never panic regardless of
/// input.
pub fn sort_articles(articles: &mut [Article], order: SortOrder) {
    match order {
        SortOrder::NewToOld => {
            articles.sort_by_key(|a| std::cmp::Reverse(a.published.unwrap_or(i64::MIN)))
        }
        SortOrder::OldToNew => articles.sort_by_key(|a| a.published.unwrap_or(i64::MIN)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::ArticleId;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn article(id: &str, section: &str, category: &str, date: Option<&str>) -> Article {
        Article {
            id: ArticleId::new(id),
            category: Arc::from(category),
            section: Arc::from(section),
            title_biased: Arc::from(format!("Biased {id}")),
            title_unbiased: Arc::from(format!("Neutral {id}")),
            published: date.and_then(crate::article::parse_published),
            snippet: Arc::from("snippet"),
            body: Arc::from("body"),
            image_url: None,
        }
    }

    fn many(n: usize, section: &str) -> Vec<Article> {
        (0..n)
            .map(|i| {
                article(
                    &format!("{section}-{i}"),
                    section,
                    section,
                    Some(&format!("2023-01-{:02}", (i % 27) + 1)),
                )
            })
            .collect()
    }

    fn state() -> FeedState {
        FeedState::default()
    }

    #[test]
    fn test_all_category_passes_everything() {
        let articles = many(5, "World");
        let d = derive(&articles, &state(), &HashSet::new());
        assert_eq!(d.total_count, 5);
    }

    #[test]
    fn test_category_filters_on_section() {
        let mut articles = many(3, "World");
        articles.extend(many(2, "Sport"));

        let mut s = state();
        s.selected_category = "Sport".to_string();
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.total_count, 2);
        assert!(d.articles.iter().all(|a| &*a.section == "Sport"));
    }

    #[test]
    fn test_custom_feed_filters_on_category_membership() {
        let mut articles = many(3, "World");
        articles.extend(many(2, "Tech"));

        let mut s = state();
        s.custom_feed = true;
        s.preferred_categories = vec!["Tech".to_string()];
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.total_count, 2);

        // A concrete category selection overrides the preferred feed.
        s.selected_category = "World".to_string();
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.total_count, 3);
    }

    #[test]
    fn test_search_is_case_insensitive_across_fields() {
        let mut a = article("1", "World", "World", Some("2023-01-01"));
        a.title_biased = Arc::from("Senate Passes Bill");
        a.title_unbiased = Arc::from("Legislation approved");
        let b = article("2", "World", "World", Some("2023-01-02"));

        let mut s = state();
        s.search_query = "senate".to_string();
        let d = derive(&[a.clone(), b.clone()], &s, &HashSet::new());
        assert_eq!(d.total_count, 1);
        assert_eq!(d.articles[0].id.as_str(), "1");

        s.search_query = "congress".to_string();
        let d = derive(&[a, b], &s, &HashSet::new());
        assert_eq!(d.total_count, 0);
    }

    #[test]
    fn test_whitespace_query_is_no_filter() {
        let articles = many(4, "World");
        let mut s = state();
        s.search_query = "   ".to_string();
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.total_count, 4);
    }

    #[test]
    fn test_sort_new_to_old_and_back() {
        let articles = vec![
            article("jan", "W", "W", Some("2023-01-01")),
            article("jun", "W", "W", Some("2023-06-01")),
            article("mar", "W", "W", Some("2023-03-01")),
        ];

        let d = derive(&articles, &state(), &HashSet::new());
        let ids: Vec<&str> = d.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["jun", "mar", "jan"]);

        let mut s = state();
        s.sort_order = SortOrder::OldToNew;
        let d = derive(&articles, &s, &HashSet::new());
        let ids: Vec<&str> = d.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["jan", "mar", "jun"]);
    }

    #[test]
    fn test_unparsable_date_sorts_last_without_panic() {
        let articles = vec![
            article("bad", "W", "W", Some("not a date")),
            article("new", "W", "W", Some("2023-06-01")),
            article("old", "W", "W", Some("2023-01-01")),
        ];

        let d = derive(&articles, &state(), &HashSet::new());
        let ids: Vec<&str> = d.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "bad"]);
    }

    #[test]
    fn test_pagination_windows_and_counts() {
        let articles = many(23, "World");
        let mut s = state();
        s.articles_per_page = 9;

        s.current_page = 1;
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.total_pages, 3);
        assert_eq!(d.articles.len(), 9);

        s.current_page = 3;
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.articles.len(), 5);

        // Page 4 clamps to 3.
        s.current_page = 4;
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.page, 3);
        assert_eq!(d.articles.len(), 5);
    }

    #[test]
    fn test_empty_set_yields_single_empty_page() {
        let d = derive(&[], &state(), &HashSet::new());
        assert_eq!(d.total_count, 0);
        assert_eq!(d.total_pages, 1);
        assert_eq!(d.page, 1);
        assert!(d.articles.is_empty());
    }

    #[test]
    fn test_page_zero_clamps_to_one() {
        let articles = many(5, "World");
        let mut s = state();
        s.current_page = 0;
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.page, 1);
        assert!(!d.articles.is_empty());
    }

    #[test]
    fn test_bookmarks_view_is_unwindowed() {
        let articles = many(23, "World");
        let bookmarks: HashSet<String> = articles
            .iter()
            .take(12)
            .map(|a| a.id.as_str().to_string())
            .collect();

        let mut s = state();
        s.show_bookmarks_only = true;
        s.articles_per_page = 9;
        let d = derive(&articles, &s, &bookmarks);
        assert_eq!(d.total_count, 12);
        assert_eq!(d.articles.len(), 12);
        assert_eq!(d.total_pages, 1);
    }

    #[test]
    fn test_bookmarks_view_with_empty_set() {
        let articles = many(5, "World");
        let mut s = state();
        s.show_bookmarks_only = true;
        let d = derive(&articles, &s, &HashSet::new());
        assert_eq!(d.total_count, 0);
        assert!(d.articles.is_empty());
        assert_eq!(d.total_pages, 1);
    }

    #[test]
    fn test_bookmarks_view_ignores_category_filter() {
        let mut articles = many(3, "World");
        articles.extend(many(2, "Sport"));
        let bookmarks: HashSet<String> =
            vec!["World-0".to_string(), "Sport-0".to_string()].into_iter().collect();

        let mut s = state();
        s.show_bookmarks_only = true;
        s.selected_category = "Sport".to_string();
        let d = derive(&articles, &s, &bookmarks);
        // Bookmark membership is the source set; category does not re-filter it.
        assert_eq!(d.total_count, 2);
    }

    #[test]
    fn test_total_pages_edges() {
        assert_eq!(total_pages(0, 9), 1);
        assert_eq!(total_pages(9, 9), 1);
        assert_eq!(total_pages(10, 9), 2);
        assert_eq!(total_pages(23, 9), 3);
        // Degenerate per_page never divides by zero.
        assert_eq!(total_pages(5, 0), 5);
    }
}
