//! # Quill Core
//!
//! Domain types, collaborator traits, and error definitions for the Quill
//! generation loop. This crate has no HTTP or runtime framework in it; it
//! defines the model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`] streams tokens from a language-model backend
//! - [`SearchProvider`] runs web searches and fetches page content
//! - [`ActionRouter`] picks the initial action for a prompt
//! - [`MemoryStore`] serves the long-term memory context
//!
//! Implementations live in their own crates (or in the embedding
//! application), so the loop can be driven by scripted stand-ins in tests.

pub mod agent;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod router;
pub mod search;

// Re-export key types at crate root for ergonomics
pub use agent::{Attachment, Credentials, HistoryEntry, Sender, ThinkingMode};
pub use error::{MemoryError, ProviderError, RouterError, SearchError};
pub use memory::{MemoryContext, MemoryStore};
pub use message::{Message, Part, Role};
pub use provider::{
    ChunkReceiver, Citation, Provider, ProviderRequest, StreamChunk, dedupe_citations,
};
pub use router::{ActionRouter, RouteDecision, RouterAction, StaticRouter};
pub use search::{DisabledSearch, SearchProvider, SearchResult};
