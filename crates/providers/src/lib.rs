//! LLM Provider implementations for Quill.
//!
//! All providers implement the `quill_core::Provider` trait. `BackendSet`
//! picks one per request by classifying the model id.

pub mod gemini;
pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod sse;

#[cfg(test)]
mod test_server;

pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{NoticeFn, RetryPolicy, backoff_delay};
pub use router::{BackendKind, BackendSet, Selection, classify_model};

/// Shared HTTP client settings. Streams may run for minutes, so only the
/// connect phase is bounded.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}
