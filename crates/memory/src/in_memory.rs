//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use quill_core::error::MemoryError;
use quill_core::memory::{MemoryContext, MemoryStore};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{Layers, select_layers};

/// A memory store that keeps its layers in a map.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    layers: Arc<RwLock<Layers>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a layer.
    pub async fn set_layer(&self, name: impl Into<String>, value: serde_json::Value) {
        self.layers.write().await.insert(name.into(), value);
    }

    pub async fn remove_layer(&self, name: &str) -> bool {
        self.layers.write().await.remove(name).is_some()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str { "in_memory" }

    async fn get_context(&self, layers: &[String]) -> Result<MemoryContext, MemoryError> {
        Ok(select_layers(&*self.layers.read().await, layers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn returns_requested_layers_in_order() {
        let store = InMemoryStore::new();
        store.set_layer("facts", json!(["plays chess"])).await;
        store.set_layer("profile", json!({"name": "Ada"})).await;
        store.set_layer("secrets", json!("not requested")).await;

        let ctx = store
            .get_context(&["profile".into(), "facts".into(), "missing".into()])
            .await
            .unwrap();

        let names: Vec<_> = ctx.layer_names().collect();
        assert_eq!(names, ["profile", "facts"]);
        assert!(ctx.get("secrets").is_none());
    }

    #[tokio::test]
    async fn remove_layer() {
        let store = InMemoryStore::new();
        store.set_layer("profile", json!({"name": "Ada"})).await;
        assert!(store.remove_layer("profile").await);
        assert!(!store.remove_layer("profile").await);

        let ctx = store.get_context(&["profile".into()]).await.unwrap();
        assert!(ctx.is_empty());
    }
}
