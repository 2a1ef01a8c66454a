//! Web search collaborator.
//!
//! [`DuckDuckGoSearch`] scrapes the DuckDuckGo HTML endpoint. Results that
//! lack a title or link are dropped; callers treat any [`SearchError`] as
//! "no results".

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = concat!("planner-gateway/", env!("CARGO_PKG_VERSION"));

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

/// Search failure.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(String),

    #[error("Search returned HTTP {0}")]
    Status(u16),
}

/// Text web search.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Run a text search returning at most `max_results` usable hits.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchResult>, SearchError>;
}

/// Search that never returns anything.
pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(
        &self,
        _query: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        Ok(Vec::new())
    }
}

/// DuckDuckGo HTML search.
pub struct DuckDuckGoSearch {
    base_url: String,
    client: Client,
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .connect_timeout(Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Override the search endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let results = parse_results(&html, max_results);
        tracing::debug!(query = %query, results = results.len(), "Web search completed");
        Ok(results)
    }
}

/// Extract search hits from a DuckDuckGo HTML results page.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(title_sel), Ok(snippet_sel)) = (
        Selector::parse("div.result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    document
        .select(&result_sel)
        .filter(|result| !result.value().classes().any(|c| c == "result--ad"))
        .filter_map(|result| {
            let link = result.select(&title_sel).next()?;
            let title = element_text(&link);
            let href = link
                .value()
                .attr("href")
                .map(resolve_href)
                .unwrap_or_default();
            let body = result
                .select(&snippet_sel)
                .next()
                .map(|s| element_text(&s))
                .unwrap_or_default();

            if title.is_empty() || href.is_empty() {
                return None;
            }
            Some(SearchResult { title, href, body })
        })
        .take(max_results)
        .collect()
}

/// Collapse an element's text nodes into single-spaced text.
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unwrap DuckDuckGo's `/l/?uddg=` redirect links to the target URL.
fn resolve_href(raw: &str) -> String {
    let raw = raw.trim();
    let absolute = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    };

    match url::Url::parse(&absolute) {
        Ok(parsed) => parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())
            .unwrap_or(absolute),
        Err(_) => absolute,
    }
}
