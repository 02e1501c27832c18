//! HTTP client for the news API.
//!
//! Endpoints:
//! - `GET  /articles`   — paged query (category / search / id-list filters)
//! - `GET  /categories` — category vocabulary
//! - `POST /debias`     — trigger headline rewriting for one article
//!
//! Transient failures (timeouts, transport errors, 5xx) are retried with
//! exponential backoff; everything else surfaces immediately as a
//! recoverable [`FetchError`].
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::{ArticleQuery, ArticleSource, FetchError, FetchedPage};
use crate::article::{ArticleDoc, ArticleId};

static API_TOKEN: OnceLock<Option<SecretString>> = OnceLock::new();

fn get_api_token() -> Option<&'static SecretString> {
    API_TOKEN
        .get_or_init(|| std::env::var("BIASBRIEF_API_TOKEN").ok().map(SecretString::from))
        .as_ref()
}

const REQUEST_TIMEOUT_SECS: u64 = 20;
const MAX_RETRIES: u32 = 3;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    articles: Vec<ArticleDoc>,
    #[serde(default, alias = "total")]
    total_count: usize,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct DebiasRequest<'a> {
    article_id: &'a str,
    title: &'a str,
}

// ============================================================================
// NewsApi
// ============================================================================

#[derive(Debug)]
pub struct NewsApi {
    client: reqwest::Client,
    base_url: Url,
}

impl NewsApi {
    /// Build a client against `base_url`.
    ///
    /// HTTPS is required except for localhost (testing against a local mock
    /// server); the bearer token, if configured, would otherwise leak over
    /// cleartext.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, FetchError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| FetchError::InvalidBaseUrl(e.to_string()))?;
        // A trailing slash makes Url::join append endpoint paths instead of
        // replacing the last segment of a prefixed base (".../v1").
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }

        match url.scheme() {
            "https" => {}
            "http" => {
                let host = url.host_str().unwrap_or("");
                if host != "localhost" && host != "127.0.0.1" && host != "[::1]" {
                    tracing::error!(base_url = %base_url, "Rejecting non-HTTPS API base URL");
                    return Err(FetchError::InsecureBaseUrl);
                }
                tracing::warn!(base_url = %base_url, "Using non-HTTPS API base URL (localhost only)");
            }
            scheme => {
                return Err(FetchError::InvalidBaseUrl(format!(
                    "unsupported scheme: {scheme}"
                )))
            }
        }

        Ok(Self {
            client,
            base_url: url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidBaseUrl(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match get_api_token() {
            Some(token) => request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    /// Send with a hard timeout and map the outcome onto [`FetchError`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, FetchError> {
        let response = tokio::time::timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            self.authorize(request).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout(REQUEST_TIMEOUT_SECS))?
        .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response)
    }

    /// Retry wrapper for transient failures. Backoff: 1s, 2s, 4s.
    async fn with_retry<T, F, Fut>(&self, op_name: &'static str, op: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let mut retry_count = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = 1u64 << retry_count;
                    tracing::debug!(
                        op = op_name,
                        error = %e,
                        retry = retry_count + 1,
                        delay_secs = delay,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn query_params(query: &ArticleQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("page_size", query.page_size.to_string()),
            ("sort", query.sort.as_str().to_string()),
        ];
        if let Some(category) = &query.category {
            params.push(("category", category.clone()));
        }
        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                params.push(("q", search.to_string()));
            }
        }
        if let Some(ids) = &query.ids {
            let joined: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
            params.push(("ids", joined.join(",")));
        }
        params
    }
}

#[async_trait]
impl ArticleSource for NewsApi {
    async fn query(&self, query: &ArticleQuery) -> Result<FetchedPage, FetchError> {
        let url = self.endpoint("articles")?;
        let params = Self::query_params(query);

        let response: QueryResponse = self
            .with_retry("query", || async {
                let request = self.client.get(url.clone()).query(&params);
                let response = self.send(request).await?;
                response
                    .json::<QueryResponse>()
                    .await
                    .map_err(|e| FetchError::Decode(e.to_string()))
            })
            .await?;

        let articles: Vec<_> = response
            .articles
            .into_iter()
            .map(ArticleDoc::normalize)
            .collect();
        // A server that omits the total gets it from the page itself.
        let total_count = response.total_count.max(articles.len());

        tracing::debug!(
            count = articles.len(),
            total = total_count,
            page = query.page,
            "Fetched article page"
        );

        Ok(FetchedPage {
            articles,
            total_count,
        })
    }

    async fn list_categories(&self) -> Result<Vec<String>, FetchError> {
        let url = self.endpoint("categories")?;

        self.with_retry("categories", || async {
            let response = self.send(self.client.get(url.clone())).await?;
            response
                .json::<Vec<String>>()
                .await
                .map_err(|e| FetchError::Decode(e.to_string()))
        })
        .await
    }

    async fn debias(&self, id: &ArticleId, biased_title: &str) -> Result<(), FetchError> {
        let url = self.endpoint("debias")?;
        let body = DebiasRequest {
            article_id: id.as_str(),
            title: biased_title,
        };

        // No retry: the rewrite is not idempotent from the service's point
        // of view, and the caller re-fetches to pick up the result anyway.
        let request = self.client.post(url).json(&body);
        self.send(request).await?;

        tracing::debug!(id = %id, "Debias trigger accepted");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::SortOrder;

    fn api(base: &str) -> Result<NewsApi, FetchError> {
        NewsApi::new(reqwest::Client::new(), base)
    }

    #[test]
    fn test_https_base_url_accepted() {
        assert!(api("https://api.example.com").is_ok());
    }

    #[test]
    fn test_http_localhost_accepted() {
        assert!(api("http://127.0.0.1:8080").is_ok());
        assert!(api("http://localhost:8080").is_ok());
    }

    #[test]
    fn test_http_remote_rejected() {
        let err = api("http://api.example.com").unwrap_err();
        assert!(matches!(err, FetchError::InsecureBaseUrl));
    }

    #[test]
    fn test_garbage_base_url_rejected() {
        assert!(matches!(
            api("not a url").unwrap_err(),
            FetchError::InvalidBaseUrl(_)
        ));
        assert!(matches!(
            api("ftp://example.com").unwrap_err(),
            FetchError::InvalidBaseUrl(_)
        ));
    }

    #[test]
    fn test_query_params_shape() {
        let query = ArticleQuery {
            page: 2,
            page_size: 9,
            sort: SortOrder::OldToNew,
            category: Some("Sport".to_string()),
            search: Some("  senate  ".to_string()),
            ids: None,
        };
        let params = NewsApi::query_params(&query);
        assert!(params.contains(&("page", "2".to_string())));
        assert!(params.contains(&("sort", "old-to-new".to_string())));
        assert!(params.contains(&("category", "Sport".to_string())));
        assert!(params.contains(&("q", "senate".to_string())));
    }

    #[test]
    fn test_query_params_id_list() {
        let query = ArticleQuery {
            ids: Some(vec![ArticleId::new("a1"), ArticleId::new("a2")]),
            ..ArticleQuery::default()
        };
        let params = NewsApi::query_params(&query);
        assert!(params.contains(&("ids", "a1,a2".to_string())));
    }

    #[test]
    fn test_blank_search_not_sent() {
        let query = ArticleQuery {
            search: Some("   ".to_string()),
            ..ArticleQuery::default()
        };
        let params = NewsApi::query_params(&query);
        assert!(params.iter().all(|(k, _)| *k != "q"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Timeout(20).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Decode("bad json".to_string()).is_retryable());
    }
}
