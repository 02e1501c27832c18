//! External collaborators: the article query/category/debias service.
mod client;

use async_trait::async_trait;
use thiserror::Error;

use crate::article::{Article, ArticleId};
use crate::derive::SortOrder;

pub use client::NewsApi;

// ============================================================================
// Query Types
// ============================================================================

/// One request against the article query endpoint.
///
/// Pagination is offset-style from the caller's perspective; `ids` switches
/// the endpoint into explicit-id lookup (bookmark sets, single-article
/// re-fetch after a debias trigger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleQuery {
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub sort: SortOrder,
    /// `None` = all categories ("All" is never sent over the wire).
    pub category: Option<String>,
    pub search: Option<String>,
    pub ids: Option<Vec<ArticleId>>,
}

impl Default for ArticleQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 9,
            sort: SortOrder::default(),
            category: None,
            search: None,
            ids: None,
        }
    }
}

/// A fetched result set with the server-side total.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub articles: Vec<Article>,
    pub total_count: usize,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    Status(u16),
    #[error("malformed response payload: {0}")]
    Decode(String),
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("insecure API base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl FetchError {
    /// Transient failures worth retrying: timeouts, transport errors, and
    /// server-side (5xx) statuses.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status(status) => *status >= 500,
            FetchError::Decode(_)
            | FetchError::InvalidBaseUrl(_)
            | FetchError::InsecureBaseUrl => false,
        }
    }
}

// ============================================================================
// ArticleSource Trait
// ============================================================================

/// Abstract article service.
///
/// The feed controller only ever talks to this trait; [`NewsApi`] is the
/// HTTP implementation, tests substitute an in-process fake.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Query articles by filter/sort/page, or by an explicit id list.
    async fn query(&self, query: &ArticleQuery) -> Result<FetchedPage, FetchError>;

    /// The category vocabulary. The `"All"` sentinel is the caller's to
    /// prepend.
    async fn list_categories(&self) -> Result<Vec<String>, FetchError>;

    /// Trigger headline debiasing for one article.
    ///
    /// Fire-and-forget by contract: the persisted unbiased title is obtained
    /// by re-querying afterwards, never trusted from this response.
    async fn debias(&self, id: &ArticleId, biased_title: &str) -> Result<(), FetchError>;
}
