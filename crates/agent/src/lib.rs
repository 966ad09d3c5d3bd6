//! The Quill generation loop.
//!
//! The agent follows a **Stream → Inspect → Pivot** cycle:
//!
//! 1. **Route** the request once to pick the initial action
//! 2. **Build context** (system prompt + history + memory + search results)
//! 3. **Stream** a segment from the selected backend, stopping at the first
//!    closing control tag
//! 4. **If search tags**: run the queries concurrently and continue with a
//!    synthesis prompt
//! 5. **If another tag**: switch action and continue with the tag's content
//! 6. **Otherwise**: return the accumulated text and citations
//!
//! The loop runs at most six iterations and honors cancellation at every
//! await point.

pub mod loop_runner;
pub mod prompt;
pub mod search_injector;
pub mod stream_event;
pub mod tags;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{AgentExecutionResult, AgentInput, AgentLoop, OutputRecord, STOPPED_PLACEHOLDER};
pub use prompt::{DEFAULT_BASE_INSTRUCTIONS, PromptBuilder};
pub use search_injector::{SearchInjector, SearchSynthesis};
pub use stream_event::AgentStreamEvent;
pub use tags::{Directive, ExtractedTags, TagKind, TagWatcher};
