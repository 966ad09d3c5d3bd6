//! Memory trait — long-term context served to the loop once per request.
//!
//! Memory is organised in named layers (e.g. "profile", "preferences",
//! "facts"). The loop asks for the layers it wants and serializes whatever
//! comes back into the system prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Named memory layers, in the order they were requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryContext {
    layers: serde_json::Map<String, serde_json::Value>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a layer.
    pub fn insert(&mut self, layer: impl Into<String>, value: serde_json::Value) {
        self.layers.insert(layer.into(), value);
    }

    pub fn get(&self, layer: &str) -> Option<&serde_json::Value> {
        self.layers.get(layer)
    }

    /// True when no layer carries any data.
    pub fn is_empty(&self) -> bool {
        self.layers.values().all(|v| match v {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.trim().is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            _ => false,
        })
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Serialize for inclusion in a system prompt. Empty when there is nothing to say.
    pub fn to_prompt_block(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        serde_json::to_string_pretty(&self.layers).unwrap_or_default()
    }
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (tests, ephemeral sessions), JSON file, none.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The store name (e.g., "in_memory", "file", "none").
    fn name(&self) -> &str;

    /// Load the requested layers. Unknown layers are simply absent from the result.
    async fn get_context(&self, layers: &[String]) -> Result<MemoryContext, MemoryError>;
}
