//! Provider trait — the abstraction over streaming LLM backends.
//!
//! A Provider knows how to open a token stream for a conversation and a
//! system instruction. Each chunk carries a text delta and, for backends
//! with built-in web grounding, the sources backing it.
//!
//! Implementations: the native grounded backend and an OpenAI-compatible
//! SSE endpoint. The loop selects one per request and never looks further.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-2.5-flash", "gpt-4o-mini")
    pub model: String,

    /// The conversation messages, oldest first
    pub messages: Vec<Message>,

    /// System instruction for this request
    pub system_instruction: String,

    /// Internal reasoning-token budget, if the backend supports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// Enable the backend's built-in web grounding tool
    #[serde(default)]
    pub web_grounding: bool,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// Build a request with default sampling and no grounding.
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            system_instruction: system_instruction.into(),
            thinking_budget: None,
            web_grounding: false,
            temperature: default_temperature(),
        }
    }
}

/// A source backing part of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

impl Citation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Remove repeated URLs, keeping the first appearance of each.
pub fn dedupe_citations(citations: &[Citation]) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    citations
        .iter()
        .filter(|c| seen.insert(c.url.as_str()))
        .cloned()
        .collect()
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Grounding sources attached to this chunk
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    /// A plain text delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// The end-of-stream marker.
    pub fn finished() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// The receiving half of an open token stream.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The agent loop calls `stream()`
/// without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Open a token stream.
    ///
    /// The token is forwarded to the transport: once it fires, the provider
    /// stops reading the body and closes the channel. Firing while the
    /// request is still being sent yields `ProviderError::Cancelled`.
    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
