//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, DeepSeek, Groq, Ollama, vLLM and any other
//! endpoint exposing a streaming `/v1/chat/completions` route. These models
//! have no built-in web grounding, so the loop may run its own search batch
//! for them.

use async_trait::async_trait;
use futures::StreamExt;
use quill_core::error::ProviderError;
use quill_core::message::{Message, Role};
use quill_core::provider::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::sse::{SseDecoder, SseEvent};

/// Fixed sampling temperature for the secondary backend.
const TEMPERATURE: f32 = 0.7;

/// An OpenAI-compatible streaming provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: crate::http_client(),
        }
    }

    /// Use a caller-built HTTP client (custom TLS, proxy or timeout settings).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Flatten the system instruction and conversation into chat messages.
    ///
    /// Inline binary parts have no representation here and are dropped.
    fn to_api_messages(system_instruction: &str, messages: &[Message]) -> Vec<ApiMessage> {
        let system = (!system_instruction.is_empty()).then(|| ApiMessage {
            role: "system".into(),
            content: system_instruction.to_string(),
        });

        system
            .into_iter()
            .chain(messages.iter().map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Model => "assistant".into(),
                },
                content: m.text(),
            }))
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.system_instruction, &request.messages),
            "stream": true,
            "temperature": TEMPERATURE,
        })
    }
}

/// Extract the first choice's text delta from one `data:` payload.
fn parse_delta(data: &str) -> Result<Option<String>, serde_json::Error> {
    let parsed: StreamResponse = serde_json::from_str(data)?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = send => result.map_err(|e| ProviderError::Network(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // Dropping the body stream aborts the connection.
                        debug!(provider = %provider_name, "Stream cancelled");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let Some(chunk_result) = next else { break };
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.push(&bytes) {
                    let data = match event {
                        SseEvent::Done => {
                            let _ = tx.send(Ok(StreamChunk::finished())).await;
                            return;
                        }
                        SseEvent::Data(data) => data,
                    };

                    match parse_delta(&data) {
                        Ok(Some(content)) => {
                            if tx.send(Ok(StreamChunk::text(content))).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            if let Some(SseEvent::Data(data)) = decoder.finish()
                && let Ok(Some(content)) = parse_delta(&data)
            {
                let _ = tx.send(Ok(StreamChunk::text(content))).await;
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::finished())).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{self, CannedResponse, drain, serve, text_of};
    use quill_core::message::Part;
    use std::time::Duration;

    fn provider(base_url: &str) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", base_url, "sk-test").with_client(test_server::client())
    }

    fn chat_request() -> ProviderRequest {
        ProviderRequest::new("gpt-4o-mini", vec![Message::user("Hi")], "Be brief.")
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("vllm", "http://localhost:8000/v1/", "k");
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::user("Hello"), Message::model("Hi there")];
        let api_messages = OpenAiCompatProvider::to_api_messages("You are helpful", &messages);
        assert_eq!(api_messages.len(), 3);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
        assert_eq!(api_messages[2].role, "assistant");
        assert_eq!(api_messages[2].content, "Hi there");
    }

    #[test]
    fn empty_system_instruction_omitted() {
        let api_messages = OpenAiCompatProvider::to_api_messages("", &[Message::user("Hi")]);
        assert_eq!(api_messages.len(), 1);
        assert_eq!(api_messages[0].role, "user");
    }

    #[test]
    fn inline_data_dropped_from_flat_messages() {
        let msg = Message::user("describe this").with_part(Part::inline_data("image/png", "AAAA"));
        let api_messages = OpenAiCompatProvider::to_api_messages("", &[msg]);
        assert_eq!(api_messages[0].content, "describe this");
    }

    #[test]
    fn request_body_shape() {
        let request = ProviderRequest::new("gpt-4o-mini", vec![Message::user("Hi")], "sys");
        let body = OpenAiCompatProvider::build_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(parse_delta(data).unwrap().as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_finish_chunk() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_delta(data).unwrap(), None);
    }

    #[test]
    fn parse_usage_only_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        assert_eq!(parse_delta(data).unwrap(), None);
    }

    #[test]
    fn malformed_chunk_is_an_error() {
        assert!(parse_delta("{not json").is_err());
    }

    #[tokio::test]
    async fn cancelled_before_send_returns_cancelled() {
        let provider = OpenAiCompatProvider::new("test", "http://127.0.0.1:9", "k");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ProviderRequest::new("m", vec![Message::user("Hi")], "");
        let err = provider.stream(request, cancel).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn reader_skips_bad_lines_and_stops_at_done() {
        let (base_url, served) = serve(CannedResponse::sse(&[
            ": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"lo\"}}]}\r\n\r\ndata: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" after done\"}}]}\n\n",
        ]))
        .await;

        let rx = provider(&base_url)
            .stream(chat_request(), CancellationToken::new())
            .await
            .unwrap();
        let items = drain(rx).await;

        assert_eq!(text_of(&items), "Hello");
        assert!(items.iter().all(|i| i.is_ok()));
        let finished = items.iter().filter(|i| i.as_ref().unwrap().done).count();
        assert_eq!(finished, 1);
        assert!(items.last().unwrap().as_ref().unwrap().done);

        let served = served.await.unwrap();
        assert!(served.head.starts_with("POST /chat/completions HTTP/1.1"));
        assert!(served.head.to_lowercase().contains("authorization: bearer sk-test"));
        let body: serde_json::Value = serde_json::from_str(&served.body).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn body_ending_without_done_still_finishes() {
        let (base_url, _served) = serve(CannedResponse::sse(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" tail\"}}]}",
        ]))
        .await;

        let rx = provider(&base_url)
            .stream(chat_request(), CancellationToken::new())
            .await
            .unwrap();
        let items = drain(rx).await;

        assert_eq!(text_of(&items), "partial tail");
        assert!(items.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn non_success_status_fails_before_streaming() {
        let (base_url, _served) = serve(CannedResponse::error(
            "500 Internal Server Error",
            r#"{"error":{"message":"upstream exploded"}}"#,
        ))
        .await;

        let err = provider(&base_url)
            .stream(chat_request(), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 500);
                assert!(message.contains("upstream exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_drops_the_body() {
        let (base_url, served) = serve(
            CannedResponse::sse(&["data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n\n"])
                .hold_open(),
        )
        .await;

        let provider = provider(&base_url);
        let cancel = CancellationToken::new();
        let mut rx = provider.stream(chat_request(), cancel.clone()).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("first"));

        cancel.cancel();
        let rest = drain(rx).await;
        assert!(rest.is_empty());
        drop(provider);

        let served = tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .expect("server never saw the connection close")
            .unwrap();
        assert!(served.client_closed);
    }
}
