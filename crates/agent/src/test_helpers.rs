//! Scripted collaborators shared by the agent unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::error::{ProviderError, SearchError};
use quill_core::provider::{ChunkReceiver, Provider, ProviderRequest, StreamChunk};
use quill_core::search::{SearchProvider, SearchResult};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::stream_event::AgentStreamEvent;

/// What one `stream()` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Send these chunks, then the end marker.
    Chunks(Vec<StreamChunk>),
    /// Fail before any chunk is sent.
    OpenError(ProviderError),
    /// Send these chunks, then keep the stream open until cancelled.
    ChunksThenHang(Vec<StreamChunk>),
}

impl Script {
    pub fn text(content: &str) -> Self {
        Self::Chunks(vec![StreamChunk::text(content)])
    }

    pub fn deltas(parts: &[&str]) -> Self {
        Self::Chunks(parts.iter().map(|p| StreamChunk::text(*p)).collect())
    }
}

/// Provider that replays scripts in order and records every request.
///
/// Once the queue is empty, later calls stream nothing (or replay the last
/// script when built with [`ScriptedProvider::repeating`]).
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Option<Script>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(script: Script) -> Self {
        Self {
            repeat: Some(script),
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or(Script::Chunks(vec![]));

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        match script {
            Script::OpenError(e) => return Err(e),
            Script::Chunks(chunks) => {
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
                let _ = tx.send(Ok(StreamChunk::finished())).await;
            }
            Script::ChunksThenHang(chunks) => {
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    drop(tx);
                });
            }
        }
        Ok(rx)
    }
}

/// Search backend with canned results per query.
#[derive(Default)]
pub struct MockSearch {
    results: HashMap<String, Vec<SearchResult>>,
    failing: HashSet<String>,
    fetch_delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.results.insert(query.to_string(), results);
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Every query searched so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());

        if self.failing.contains(query) {
            return Err(SearchError::QueryFailed {
                query: query.to_string(),
                reason: "scripted failure".into(),
            });
        }

        let mut results = self.results.get(query).cloned().unwrap_or_default();
        results.truncate(limit);
        Ok(results)
    }

    async fn fetch_content(
        &self,
        mut results: Vec<SearchResult>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        results.truncate(limit);
        Ok(results)
    }
}

/// Drain whatever events are already queued.
pub fn collect_events(rx: &mut UnboundedReceiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
