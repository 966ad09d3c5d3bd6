//! Retry policy for the primary backend.
//!
//! Two failure classes are recovered here, both before any token arrives:
//! an unavailable model is swapped once for the configured fallback model,
//! and rate limiting is retried on the same model with exponential backoff.
//! Everything else propagates unchanged.

use async_trait::async_trait;
use quill_core::error::ProviderError;
use quill_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Side channel for human-readable progress notices ("retrying in 5s").
pub type NoticeFn = Arc<dyn Fn(&str) + Send + Sync>;

pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Delay before rate-limit retry number `attempt` (zero-based):
/// `2^attempt * 2000ms + 1000ms`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(factor.saturating_mul(2_000).saturating_add(1_000))
}

/// Wraps a provider with model fallback and rate-limit backoff.
///
/// Built fresh for every invocation; it holds no state between calls.
pub struct RetryPolicy {
    inner: Arc<dyn Provider>,
    default_model: String,
    fallback_model: String,
    max_rate_limit_retries: u32,
    notice: Option<NoticeFn>,
}

impl RetryPolicy {
    pub fn new(
        inner: Arc<dyn Provider>,
        default_model: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            default_model: default_model.into(),
            fallback_model: fallback_model.into(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            notice: None,
        }
    }

    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn with_notice(mut self, notice: NoticeFn) -> Self {
        self.notice = Some(notice);
        self
    }

    fn notify(&self, message: &str) {
        if let Some(notice) = &self.notice {
            notice(message);
        }
    }
}

#[async_trait]
impl Provider for RetryPolicy {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(
        &self,
        mut request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        if request.model.trim().is_empty() {
            request.model = self.default_model.clone();
        }

        let mut attempt = 0;
        loop {
            let err = match self.inner.stream(request.clone(), cancel.clone()).await {
                Ok(rx) => return Ok(rx),
                Err(e) => e,
            };

            if err.is_model_unavailable() {
                if request.model == self.fallback_model {
                    warn!(model = %request.model, error = %err, "Fallback model unavailable");
                    return Err(err);
                }

                info!(
                    from = %request.model,
                    to = %self.fallback_model,
                    "Model unavailable, switching to fallback"
                );
                self.notify(&format!(
                    "Model '{}' is unavailable, switching to '{}'.",
                    request.model, self.fallback_model
                ));
                request.model = self.fallback_model.clone();
                continue;
            }

            if err.is_rate_limited() && attempt < self.max_rate_limit_retries {
                let delay = backoff_delay(attempt);
                attempt += 1;

                warn!(
                    model = %request.model,
                    attempt,
                    max = self.max_rate_limit_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                self.notify(&format!(
                    "Rate limited. Retrying in {}s (attempt {}/{})...",
                    delay.as_secs(),
                    attempt,
                    self.max_rate_limit_retries
                ));

                // Runs to completion once entered; cancellation is observed
                // at the next stream open.
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(err);
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::message::Message;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider that fails with scripted errors, then streams "ok".
    struct ScriptedProvider {
        failures: Mutex<VecDeque<ProviderError>>,
        models_seen: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(failures: Vec<ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures.into()),
                models_seen: Mutex::new(Vec::new()),
            })
        }

        fn models_seen(&self) -> Vec<String> {
            self.models_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            request: ProviderRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<ChunkReceiver, ProviderError> {
            self.models_seen.lock().unwrap().push(request.model.clone());
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            tx.send(Ok(StreamChunk::text("ok"))).await.unwrap();
            Ok(rx)
        }
    }

    fn not_found() -> ProviderError {
        ProviderError::ApiError {
            status_code: 404,
            message: "models/x is not found".into(),
        }
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited {
            message: "RESOURCE_EXHAUSTED".into(),
        }
    }

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest::new(model, vec![Message::user("hi")], "")
    }

    fn collecting_notice() -> (NoticeFn, Arc<Mutex<Vec<String>>>) {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = notices.clone();
        let notice: NoticeFn = Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string()));
        (notice, notices)
    }

    #[test]
    fn backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_millis(3_000));
        assert_eq!(backoff_delay(1), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(9_000));
    }

    #[tokio::test]
    async fn success_passes_through() {
        let inner = ScriptedProvider::new(vec![]);
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash");
        let mut rx = policy
            .stream(request("gemini-2.5-pro"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap().content.as_deref(), Some("ok"));
        assert_eq!(inner.models_seen(), ["gemini-2.5-pro"]);
    }

    #[tokio::test]
    async fn empty_model_uses_default() {
        let inner = ScriptedProvider::new(vec![]);
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.0-flash");
        policy
            .stream(request(""), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inner.models_seen(), ["gemini-2.5-flash"]);
    }

    #[tokio::test]
    async fn unavailable_model_switches_to_fallback() {
        let inner = ScriptedProvider::new(vec![not_found()]);
        let (notice, notices) = collecting_notice();
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash")
            .with_notice(notice);

        policy
            .stream(request("gemini-9-ultra"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(inner.models_seen(), ["gemini-9-ultra", "gemini-2.5-flash"]);
        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("gemini-2.5-flash"));
    }

    #[tokio::test]
    async fn unavailable_fallback_is_fatal() {
        let inner = ScriptedProvider::new(vec![not_found(), not_found(), not_found()]);
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash");

        let err = policy
            .stream(request("gemini-9-ultra"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_model_unavailable());
        assert_eq!(inner.models_seen(), ["gemini-9-ultra", "gemini-2.5-flash"]);
    }

    #[tokio::test]
    async fn requested_fallback_fails_without_substitution() {
        let inner = ScriptedProvider::new(vec![not_found()]);
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash");

        assert!(
            policy
                .stream(request("gemini-2.5-flash"), CancellationToken::new())
                .await
                .is_err()
        );
        assert_eq!(inner.models_seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_with_backoff() {
        let inner = ScriptedProvider::new(vec![rate_limited(), rate_limited()]);
        let (notice, notices) = collecting_notice();
        let policy =
            RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash").with_notice(notice);

        let start = tokio::time::Instant::now();
        policy
            .stream(request("gemini-2.5-flash"), CancellationToken::new())
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3_000 + 5_000));
        assert!(elapsed < Duration::from_millis(9_000));
        assert_eq!(inner.models_seen().len(), 3);
        let notices = notices.lock().unwrap();
        assert!(notices[0].contains("3s"));
        assert!(notices[1].contains("5s"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_propagates() {
        let inner = ScriptedProvider::new(vec![rate_limited(); 4]);
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash");

        let start = tokio::time::Instant::now();
        let err = policy
            .stream(request("gemini-2.5-flash"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(inner.models_seen().len(), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(17_000));
        assert!(elapsed < Duration::from_millis(18_000));
    }

    #[tokio::test]
    async fn other_errors_propagate_immediately() {
        let inner = ScriptedProvider::new(vec![ProviderError::Network("reset".into())]);
        let policy = RetryPolicy::new(inner.clone(), "gemini-2.5-flash", "gemini-2.5-flash");

        let err = policy
            .stream(request("gemini-2.5-flash"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        assert_eq!(inner.models_seen().len(), 1);
    }
}
