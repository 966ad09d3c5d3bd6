//! Search collaborator — web search plus page-content fetching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// A search hit, optionally enriched with fetched page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SearchResult {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run a query and return at most `limit` hits.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError>;

    /// Fetch page content for up to `limit` of the given hits.
    async fn fetch_content(
        &self,
        results: Vec<SearchResult>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// A search provider for deployments without web search. Every query comes
/// back empty, so search tags fall through to the remaining tag checks.
#[derive(Debug, Clone, Default)]
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        Ok(Vec::new())
    }

    async fn fetch_content(
        &self,
        results: Vec<SearchResult>,
        _limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        Ok(results)
    }
}
