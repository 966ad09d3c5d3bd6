//! Error types for the Quill domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum. None of them escape the loop:
//! provider errors end as a user-facing sentence, the rest are logged.

use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider: {message}")]
    RateLimited { message: String },

    #[error("Model '{model}' is not available: {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether this error means the requested model cannot serve the request
    /// (HTTP 404/400 or a "not found" style message).
    pub fn is_model_unavailable(&self) -> bool {
        match self {
            Self::ModelUnavailable { .. } => true,
            Self::ApiError {
                status_code,
                message,
            } => matches!(status_code, 400 | 404) || mentions_missing_model(message),
            Self::StreamInterrupted(message) | Self::Network(message) => {
                mentions_missing_model(message)
            }
            _ => false,
        }
    }

    /// Whether this error is a transient rate-limit / quota rejection.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ApiError {
                status_code,
                message,
            } => *status_code == 429 || mentions_quota(message),
            Self::StreamInterrupted(message) | Self::Network(message) => mentions_quota(message),
            _ => false,
        }
    }

    /// A single sentence suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { .. } => {
                "The model is receiving too many requests right now. Please try again in a moment."
                    .into()
            }
            Self::ModelUnavailable { model, .. } => {
                format!("The model '{model}' is not available right now.")
            }
            Self::AuthenticationFailed(_) => {
                "The model provider rejected the configured credentials.".into()
            }
            Self::ApiError { status_code, .. } => {
                format!("The model provider returned an error (status {status_code}).")
            }
            Self::Network(_) | Self::StreamInterrupted(_) => {
                "The connection to the model provider failed.".into()
            }
            Self::NotConfigured(what) => format!("The model provider is not configured: {what}"),
            Self::Cancelled => "Generation was cancelled.".into(),
        }
    }
}

/// Whether an error body says the model or resource does not exist.
pub fn mentions_missing_model(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("no such entity")
}

/// Whether an error body is a quota or rate-limit rejection.
pub fn mentions_quota(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota") || lower.contains("resource_exhausted") || lower.contains("rate limit")
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search query failed: {query} — {reason}")]
    QueryFailed { query: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted memory data: {0}")]
    Corrupted(String),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Router not available: {0}")]
    Unavailable(String),
}
