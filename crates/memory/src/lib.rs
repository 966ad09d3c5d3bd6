//! Memory store implementations for Quill.
//!
//! Every store holds named JSON layers and answers `get_context` with the
//! requested layers, in request order.

pub mod file_backend;
pub mod in_memory;
pub mod noop;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use noop::NoopMemory;

use quill_core::memory::MemoryContext;

type Layers = serde_json::Map<String, serde_json::Value>;

/// Pick the requested layers out of a store's contents.
pub(crate) fn select_layers(all: &Layers, requested: &[String]) -> MemoryContext {
    let mut context = MemoryContext::new();
    for name in requested {
        if let Some(value) = all.get(name) {
            context.insert(name.clone(), value.clone());
        }
    }
    context
}
