//! File-based memory store — one human-editable JSON object of layers.
//!
//! ```json
//! {
//!   "profile": { "name": "Ada", "timezone": "Europe/London" },
//!   "preferences": ["short answers", "metric units"],
//!   "facts": ["works on compilers"]
//! }
//! ```
//!
//! Storage location: `~/.quill/memory.json` unless configured otherwise.
//! The file is loaded once on creation and rewritten on every mutation.

use async_trait::async_trait;
use quill_core::error::MemoryError;
use quill_core::memory::{MemoryContext, MemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Layers, select_layers};

pub struct FileStore {
    path: PathBuf,
    layers: Arc<RwLock<Layers>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts empty (created on
    /// first write); an unreadable one is logged and treated as empty.
    pub fn new(path: PathBuf) -> Self {
        let layers = Self::read_layers(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable memory file");
            Layers::new()
        });
        debug!(path = %path.display(), layers = layers.len(), "File memory store loaded");
        Self {
            path,
            layers: Arc::new(RwLock::new(layers)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_layers(path: &Path) -> Result<Layers, MemoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Layers::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read memory file: {e}"
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(Layers::new());
        }

        serde_json::from_str::<Layers>(&content)
            .map_err(|e| MemoryError::Corrupted(format!("{}: {e}", path.display())))
    }

    async fn flush(&self) -> Result<(), MemoryError> {
        let layers = self.layers.read().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(&*layers)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize memory: {e}")))?;

        std::fs::write(&self.path, content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;

        Ok(())
    }

    /// Replace a layer and persist the file.
    pub async fn set_layer(
        &self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), MemoryError> {
        self.layers.write().await.insert(name.into(), value);
        self.flush().await
    }

    /// Delete a layer; returns whether it existed.
    pub async fn remove_layer(&self, name: &str) -> Result<bool, MemoryError> {
        let removed = self.layers.write().await.remove(name).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    /// Snapshot of every stored layer.
    pub async fn all_layers(&self) -> MemoryContext {
        let layers = self.layers.read().await;
        let names: Vec<String> = layers.keys().cloned().collect();
        select_layers(&layers, &names)
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_context(&self, layers: &[String]) -> Result<MemoryContext, MemoryError> {
        Ok(select_layers(&*self.layers.read().await, layers))
    }
}
