//! The bounded generation loop.
//!
//! One call to [`AgentLoop::run`] turns a user request into a final answer:
//!
//! 1. Ask the router for the initial action and load memory (once each)
//! 2. Pick the backend for the requested model
//! 3. Each iteration: build the prompt, stream a segment, stop early on a
//!    closing control tag
//! 4. Read the tags in the segment and either pivot (new action and prompt,
//!    possibly after a search batch) or finish
//!
//! The loop ends when a segment carries no actionable tag, the iteration
//! bound is reached, or the caller cancels. Fatal backend errors become a
//! single user-facing output record; nothing is propagated to the caller.

use std::sync::Arc;

use chrono::Utc;
use quill_config::{AppConfig, MAX_LOOP_ITERATIONS};
use quill_core::agent::{Attachment, Credentials, HistoryEntry, ThinkingMode};
use quill_core::error::ProviderError;
use quill_core::memory::{MemoryContext, MemoryStore};
use quill_core::message::Message;
use quill_core::provider::{Citation, ProviderRequest, dedupe_citations};
use quill_core::router::{ActionRouter, RouterAction, StaticRouter};
use quill_core::search::SearchProvider;
use quill_providers::{BackendKind, BackendSet, NoticeFn, Selection};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, info_span, warn};
use uuid::Uuid;

use crate::prompt::PromptBuilder;
use crate::search_injector::SearchInjector;
use crate::stream_event::{AgentStreamEvent, EventSink};
use crate::tags::{ExtractedTags, TagWatcher, strip_control_tags};

/// Final text when the caller stopped generation before any text arrived.
pub const STOPPED_PLACEHOLDER: &str = "Generation stopped by user.";

/// Everything one request brings with it.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub credentials: Credentials,
    /// Prior turns, oldest first
    pub history: Vec<HistoryEntry>,
    /// Empty means the configured default model
    pub model: String,
    pub thinking_mode: ThinkingMode,
    /// Receives chunks, notices and action changes as they happen
    pub events: Option<UnboundedSender<AgentStreamEvent>>,
    pub cancel: CancellationToken,
}

impl AgentInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: Vec::new(),
            credentials: Credentials::default(),
            history: Vec::new(),
            model: String::new(),
            thinking_mode: ThinkingMode::default(),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_thinking_mode(mut self, mode: ThinkingMode) -> Self {
        self.thinking_mode = mode;
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<AgentStreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One message of the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub text: String,

    /// Deduplicated by URL, in order of first appearance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,

    /// Handoff for a downstream renderer when the run ended mid-action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub run_id: String,
    pub records: Vec<OutputRecord>,
    pub iterations: u32,
    /// The caller cancelled the run
    pub stopped: bool,
    pub final_action: RouterAction,
}

impl AgentExecutionResult {
    /// Text of the primary record.
    pub fn text(&self) -> &str {
        self.records.first().map(|r| r.text.as_str()).unwrap_or_default()
    }

    pub fn citations(&self) -> &[Citation] {
        self.records
            .first()
            .map(|r| r.citations.as_slice())
            .unwrap_or_default()
    }
}

/// Mutable state of one invocation. Created on entry, dropped on return.
struct LoopState {
    action: RouterAction,
    prompt: String,
    iteration: u32,
    /// Visible text of each segment, control tags removed
    segments: Vec<String>,
    /// Unique by URL; a citation's number is its position plus one
    citations: Vec<Citation>,
    search_context: String,
    history: Vec<Message>,
    stopped: bool,
}

impl LoopState {
    fn new(action: RouterAction, prompt: String, history: Vec<Message>) -> Self {
        Self {
            action,
            prompt,
            iteration: 0,
            segments: Vec::new(),
            citations: Vec::new(),
            search_context: String::new(),
            history,
            stopped: false,
        }
    }

    /// Record sources, keeping the first entry for each URL.
    fn add_citations(&mut self, citations: Vec<Citation>) {
        if citations.is_empty() {
            return;
        }
        self.citations.extend(citations);
        self.citations = dedupe_citations(&self.citations);
    }

    fn append_segment(&mut self, segment: &str) {
        let visible = strip_control_tags(segment);
        if !visible.trim().is_empty() {
            self.segments.push(visible);
        }
    }

    /// Replace the active prompt. The old prompt and the segment it produced
    /// move into the working history.
    fn pivot(&mut self, action: RouterAction, prompt: String, segment: String, events: &EventSink) {
        info!(from = %self.action, to = %action, "Switching action");
        events.emit(AgentStreamEvent::ActionChanged {
            action,
            prompt: prompt.clone(),
        });

        let previous = std::mem::replace(&mut self.prompt, prompt);
        self.history.push(Message::user(previous));
        self.history.push(Message::model(segment));
        self.action = action;
    }
}

/// The core generation loop.
pub struct AgentLoop {
    backends: BackendSet,
    search: SearchInjector,
    memory: Option<Arc<dyn MemoryStore>>,
    router: Arc<dyn ActionRouter>,
    prompts: PromptBuilder,
    memory_layers: Vec<String>,
    max_iterations: u32,
    temperature: f32,
}

impl AgentLoop {
    pub fn new(backends: BackendSet) -> Self {
        Self {
            backends,
            search: SearchInjector::default(),
            memory: None,
            router: Arc::new(StaticRouter::default()),
            prompts: PromptBuilder::default(),
            memory_layers: Vec::new(),
            max_iterations: MAX_LOOP_ITERATIONS,
            temperature: 0.7,
        }
    }

    /// Apply loop, prompt and search settings from configuration.
    pub fn from_config(config: &AppConfig, backends: BackendSet) -> Self {
        Self::new(backends)
            .with_max_iterations(config.agent.max_iterations)
            .with_memory_layers(config.agent.memory_layers.clone())
            .with_prompt_builder(PromptBuilder::from_config(&config.agent))
            .with_temperature(config.temperature)
            .with_search_injector(SearchInjector::default().with_config(&config.search))
    }

    /// Set the iteration bound, clamped to `1..=6`.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.clamp(1, MAX_LOOP_ITERATIONS);
        self
    }

    /// Use `search` for search batches, keeping the current limits.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = self.search.with_provider(search);
        self
    }

    pub fn with_search_injector(mut self, injector: SearchInjector) -> Self {
        self.search = injector;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Layers requested from the memory store on every run.
    pub fn with_memory_layers(mut self, layers: Vec<String>) -> Self {
        self.memory_layers = layers;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn ActionRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Run one request to completion.
    pub async fn run(&self, input: AgentInput) -> AgentExecutionResult {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("agent_run", run_id = %run_id);
        self.execute(run_id, input).instrument(span).await
    }

    async fn execute(&self, run_id: String, input: AgentInput) -> AgentExecutionResult {
        let events = EventSink::new(input.events.clone());

        info!(
            model = %input.model,
            thinking = ?input.thinking_mode,
            attachments = input.attachments.len(),
            history = input.history.len(),
            "Starting run"
        );

        let action = self.initial_action(&input).await;
        let memory = self.load_memory().await;

        let notice: NoticeFn = {
            let events = events.clone();
            Arc::new(move |message: &str| events.notice(message))
        };
        let selection = self
            .backends
            .select(&input.model, &input.credentials, Some(notice));

        debug!(model = %selection.model, backend = ?selection.kind, "Backend selected");

        let mut state = LoopState::new(
            action,
            input.prompt.clone(),
            PromptBuilder::history(&input.history),
        );

        let outcome = self
            .drive(&input, &selection, &memory, &mut state, &events)
            .await;

        match outcome {
            Ok(()) => {}
            Err(ProviderError::Cancelled) => state.stopped = true,
            Err(e) => {
                error!(error = %e, iteration = state.iteration, "Run failed");
                let message = e.user_message();
                events.emit(AgentStreamEvent::Error {
                    message: message.clone(),
                });
                return AgentExecutionResult {
                    run_id,
                    records: vec![OutputRecord {
                        text: message,
                        citations: Vec::new(),
                        payload: None,
                    }],
                    iterations: state.iteration,
                    stopped: false,
                    final_action: state.action,
                };
            }
        }

        let result = Self::finish(run_id, state);
        events.emit(AgentStreamEvent::Done {
            run_id: result.run_id.clone(),
            iterations: result.iterations,
            stopped: result.stopped,
            citations: result.citations().len(),
        });
        result
    }

    async fn initial_action(&self, input: &AgentInput) -> RouterAction {
        match self
            .router
            .classify(
                &input.prompt,
                &input.credentials.user_id,
                &input.credentials,
                input.attachments.len(),
            )
            .await
        {
            Ok(decision) => {
                debug!(action = %decision.action, "Router decision");
                decision.action
            }
            Err(e) => {
                warn!(error = %e, "Router failed, defaulting to SIMPLE");
                RouterAction::Simple
            }
        }
    }

    async fn load_memory(&self) -> MemoryContext {
        let Some(memory) = &self.memory else {
            return MemoryContext::new();
        };
        if self.memory_layers.is_empty() {
            return MemoryContext::new();
        }

        match memory.get_context(&self.memory_layers).await {
            Ok(context) => {
                debug!(store = memory.name(), layers = ?self.memory_layers, "Loaded memory context");
                context
            }
            Err(e) => {
                warn!(store = memory.name(), error = %e, "Memory load failed, continuing without it");
                MemoryContext::new()
            }
        }
    }

    async fn drive(
        &self,
        input: &AgentInput,
        selection: &Selection,
        memory: &MemoryContext,
        state: &mut LoopState,
        events: &EventSink,
    ) -> Result<(), ProviderError> {
        while state.iteration < self.max_iterations {
            if input.cancel.is_cancelled() {
                info!(iteration = state.iteration, "Cancelled before iteration");
                state.stopped = true;
                return Ok(());
            }

            state.iteration += 1;
            let span = debug_span!("iteration", n = state.iteration, action = %state.action);
            let segment = self
                .generate(input, selection, memory, state, events)
                .instrument(span)
                .await?;

            state.append_segment(&segment);

            if input.cancel.is_cancelled() {
                info!(iteration = state.iteration, "Cancelled mid-stream");
                state.stopped = true;
                return Ok(());
            }

            let tags = ExtractedTags::parse(&segment);
            if tags.is_empty() {
                debug!(iteration = state.iteration, "No control tag, finishing");
                return Ok(());
            }

            let queries = tags.search_queries();
            let batch_ran = !queries.is_empty() && selection.kind.search_eligible();
            if batch_ran {
                if let Some(synthesis) =
                    self.search.inject(&input.prompt, queries, &state.citations).await
                {
                    state.add_citations(synthesis.citations);
                    if !state.search_context.is_empty() {
                        state.search_context.push('\n');
                    }
                    state.search_context.push_str(&synthesis.context);
                    state.pivot(RouterAction::Simple, synthesis.prompt, segment, events);
                    continue;
                }
            }

            match tags.fallback_directive(batch_ran) {
                Some(directive) => state.pivot(directive.action, directive.prompt, segment, events),
                None => {
                    debug!(iteration = state.iteration, "No actionable tag, finishing");
                    return Ok(());
                }
            }
        }

        warn!(
            max = self.max_iterations,
            action = %state.action,
            "Iteration limit reached"
        );
        Ok(())
    }

    /// Stream one segment. Stops at the first closing control tag, at end of
    /// stream, or on cancellation.
    async fn generate(
        &self,
        input: &AgentInput,
        selection: &Selection,
        memory: &MemoryContext,
        state: &mut LoopState,
        events: &EventSink,
    ) -> Result<String, ProviderError> {
        let system = self.prompts.system_prompt(
            input.thinking_mode,
            memory,
            &state.search_context,
            Utc::now(),
        );

        let mut messages = state.history.clone();
        messages.push(PromptBuilder::user_message(&state.prompt, &input.attachments));

        let budget = input.thinking_mode.budget();
        let mut request = ProviderRequest::new(&selection.model, messages, system);
        request.thinking_budget = (budget > 0).then_some(budget);
        request.web_grounding = selection.kind == BackendKind::Native;
        request.temperature = self.temperature;

        let mut rx = selection.provider.stream(request, input.cancel.clone()).await?;
        let mut segment = String::new();
        let mut watcher = TagWatcher::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = input.cancel.cancelled() => break,
                next = rx.recv() => next,
            };

            let Some(item) = next else { break };
            let chunk = item?;

            state.add_citations(chunk.citations);

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                segment.push_str(&text);
                events.chunk(&text);

                if let Some(kind) = watcher.observe(&segment) {
                    debug!(tag = ?kind, chars = segment.len(), "Closing tag seen, stopping stream");
                    break;
                }
            }

            if chunk.done {
                break;
            }
        }

        Ok(segment)
    }

    fn finish(run_id: String, state: LoopState) -> AgentExecutionResult {
        let mut text = state.segments.join("\n\n");
        if text.trim().is_empty() {
            if state.stopped {
                text = STOPPED_PLACEHOLDER.into();
            } else if !state.search_context.trim().is_empty() {
                text = state.search_context.clone();
            }
        }

        let payload = (state.action != RouterAction::Simple).then(|| {
            serde_json::json!({
                "action": state.action,
                "prompt": state.prompt,
            })
        });

        info!(
            iterations = state.iteration,
            stopped = state.stopped,
            action = %state.action,
            chars = text.len(),
            "Run finished"
        );

        AgentExecutionResult {
            run_id,
            records: vec![OutputRecord {
                text,
                citations: state.citations,
                payload,
            }],
            iterations: state.iteration,
            stopped: state.stopped,
            final_action: state.action,
        }
    }
}
