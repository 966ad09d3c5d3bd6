//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a caller sees while a request runs: text deltas
//! as they arrive, retry notices, action pivots, and a closing summary.

use quill_core::router::RouterAction;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Events emitted by the loop during execution.
///
/// - `chunk`          — partial text from the model
/// - `notice`         — human-readable progress (fallback model, backoff countdown)
/// - `action_changed` — a control tag moved the loop to a new action
/// - `done`           — the run is complete
/// - `error`          — a fatal error ended the run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the model.
    Chunk { content: String },

    /// A retry or fallback notice.
    Notice { message: String },

    /// The loop switched action; `prompt` drives the next iteration.
    ActionChanged { action: RouterAction, prompt: String },

    /// The run is complete.
    Done {
        run_id: String,
        iterations: u32,
        stopped: bool,
        citations: usize,
    },

    /// A fatal error ended the run.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Notice { .. } => "notice",
            Self::ActionChanged { .. } => "action_changed",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Optional event sink. Sending never fails the run; a dropped receiver
/// just means nobody is listening.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<UnboundedSender<AgentStreamEvent>>);

impl EventSink {
    pub(crate) fn new(sender: Option<UnboundedSender<AgentStreamEvent>>) -> Self {
        Self(sender)
    }

    pub(crate) fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn chunk(&self, content: &str) {
        self.emit(AgentStreamEvent::Chunk {
            content: content.to_string(),
        });
    }

    pub(crate) fn notice(&self, message: &str) {
        self.emit(AgentStreamEvent::Notice {
            message: message.to_string(),
        });
    }
}
