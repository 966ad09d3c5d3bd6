//! No-op memory store — disables long-term memory entirely.

use async_trait::async_trait;
use quill_core::error::MemoryError;
use quill_core::memory::{MemoryContext, MemoryStore};

/// A memory store that knows nothing.
pub struct NoopMemory;

#[async_trait]
impl MemoryStore for NoopMemory {
    fn name(&self) -> &str { "none" }

    async fn get_context(&self, _layers: &[String]) -> Result<MemoryContext, MemoryError> {
        Ok(MemoryContext::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_returns_empty_context() {
        let ctx = NoopMemory.get_context(&["profile".into()]).await.unwrap();
        assert!(ctx.is_empty());
    }
}
