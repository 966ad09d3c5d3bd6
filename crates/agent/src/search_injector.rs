//! Batch web search and synthesis-prompt construction.
//!
//! Given the queries the model asked for, run them concurrently, fetch page
//! content under a deadline, and turn whatever came back into a follow-up
//! prompt that asks for a cited answer.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use quill_config::SearchConfig;
use quill_core::provider::Citation;
use quill_core::search::{DisabledSearch, SearchProvider, SearchResult};
use tracing::{debug, info, warn};

/// Pages shorter than this (after trimming) do not count as content.
const MIN_CONTENT_CHARS: usize = 20;

/// Output of a successful batch.
#[derive(Debug, Clone)]
pub struct SearchSynthesis {
    /// The next iteration's prompt
    pub prompt: String,
    /// Pages whose URL was not cited before, in numbering order. Appending
    /// them to the known list keeps every bracketed number valid.
    pub citations: Vec<Citation>,
    /// The aggregated, per-query-labeled result block
    pub context: String,
}

/// Results of one query, kept only when they carry real content.
struct QueryPages {
    query: String,
    pages: Vec<SearchResult>,
}

pub struct SearchInjector {
    search: Arc<dyn SearchProvider>,
    result_limit: usize,
    fetch_limit: usize,
    fetch_timeout: Duration,
    max_content_chars: usize,
}

impl Default for SearchInjector {
    fn default() -> Self {
        Self::new(Arc::new(DisabledSearch))
    }
}

impl SearchInjector {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        let defaults = SearchConfig::default();
        Self {
            search,
            result_limit: defaults.result_limit,
            fetch_limit: defaults.fetch_limit,
            fetch_timeout: Duration::from_secs(defaults.fetch_timeout_secs),
            max_content_chars: defaults.max_content_chars,
        }
    }

    /// Apply limits from configuration.
    pub fn with_config(mut self, config: &SearchConfig) -> Self {
        self.result_limit = config.result_limit;
        self.fetch_limit = config.fetch_limit;
        self.fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
        self.max_content_chars = config.max_content_chars;
        self
    }

    /// Swap the search backend, keeping the limits.
    pub fn with_provider(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = search;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_content_chars(mut self, chars: usize) -> Self {
        self.max_content_chars = chars;
        self
    }

    /// Search, then fetch content for the hits. Any failure yields an empty
    /// page list; a fetch that errors or misses the deadline falls back to
    /// the search snippets.
    async fn run_query(&self, query: &str) -> Vec<SearchResult> {
        let results = match self.search.search(query, self.result_limit).await {
            Ok(results) => results,
            Err(e) => {
                warn!(query, error = %e, "Search query failed");
                return Vec::new();
            }
        };

        if results.is_empty() {
            return results;
        }

        let fetch = self.search.fetch_content(results.clone(), self.fetch_limit);
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(pages)) => pages,
            Ok(Err(e)) => {
                warn!(query, error = %e, "Content fetch failed, using snippets");
                self.snippets(results)
            }
            Err(_) => {
                warn!(
                    query,
                    timeout_secs = self.fetch_timeout.as_secs_f32(),
                    "Content fetch timed out, using snippets"
                );
                self.snippets(results)
            }
        }
    }

    fn snippets(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        results
            .into_iter()
            .take(self.fetch_limit)
            .map(|r| {
                let snippet = r.snippet.clone();
                r.with_content(snippet)
            })
            .collect()
    }

    /// Run every query concurrently and build the synthesis prompt.
    ///
    /// `known` is the run's deduplicated citation list so far. A page whose
    /// URL is already listed reuses that number; new URLs continue after it.
    ///
    /// Returns `None` when no query produced a page with content, so the
    /// caller can fall through to its other options.
    pub async fn inject(
        &self,
        original_request: &str,
        queries: &[String],
        known: &[Citation],
    ) -> Option<SearchSynthesis> {
        if queries.is_empty() {
            return None;
        }

        info!(count = queries.len(), "Running search batch");

        let settled = join_all(queries.iter().map(|q| self.run_query(q))).await;

        let valid: Vec<QueryPages> = queries
            .iter()
            .zip(settled)
            .filter_map(|(query, pages)| {
                let usable = pages.iter().any(has_content);
                debug!(query = %query, pages = pages.len(), usable, "Search query settled");
                usable.then(|| QueryPages {
                    query: query.clone(),
                    pages,
                })
            })
            .collect();

        if valid.is_empty() {
            info!("Search batch returned no usable content");
            return None;
        }

        let mut citations: Vec<Citation> = Vec::new();
        let mut context = String::new();

        for group in &valid {
            context.push_str(&format!("### Results for \"{}\"\n\n", group.query));
            for page in &group.pages {
                let seen = known.iter().chain(&citations).position(|c| c.url == page.url);
                let index = match seen {
                    Some(pos) => pos + 1,
                    None => {
                        citations.push(Citation::new(&page.url, &page.title));
                        known.len() + citations.len()
                    }
                };

                let body = page.content.as_deref().unwrap_or(&page.snippet).trim();
                context.push_str(&format!(
                    "[{index}] {}\nURL: {}\n{}\n\n",
                    page.title,
                    page.url,
                    truncate_chars(body, self.max_content_chars)
                ));
            }
        }

        let performed: Vec<&str> = valid.iter().map(|g| g.query.as_str()).collect();
        let prompt = synthesis_prompt(original_request, &performed, &context);

        Some(SearchSynthesis {
            prompt,
            citations,
            context,
        })
    }
}

fn has_content(page: &SearchResult) -> bool {
    page.content
        .as_deref()
        .is_some_and(|c| c.trim().chars().count() >= MIN_CONTENT_CHARS)
}

/// Cut `s` to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn synthesis_prompt(original_request: &str, queries: &[&str], context: &str) -> String {
    let query_list: String = queries.iter().map(|q| format!("- {q}\n")).collect();
    format!(
        "The user asked:\n\"{original_request}\"\n\n\
         Web searches performed:\n{query_list}\n\
         Search results:\n\n{context}\
         Using these results, write a complete answer to the user's request. \
         Cite sources inline with bracketed numbers such as [1] or [2], matching \
         the result numbers above. Do not output any control tags such as \
         <SEARCH>, <DEEP> or <IMAGE>."
    )
}
