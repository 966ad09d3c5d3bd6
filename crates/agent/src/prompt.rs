//! Per-iteration prompt assembly.
//!
//! The system prompt is rebuilt every iteration from fixed parts (base
//! instructions, identity) and per-request parts (thinking directive, memory,
//! gathered search context, the current time). The conversation is the
//! trimmed history followed by the active prompt and any attachments.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use quill_config::AgentConfig;
use quill_core::agent::{Attachment, HistoryEntry, Sender, ThinkingMode};
use quill_core::memory::MemoryContext;
use quill_core::message::{Message, Part, Role};
use tracing::warn;

/// Built-in instructions describing the control-tag protocol.
pub const DEFAULT_BASE_INSTRUCTIONS: &str = "\
You are a helpful assistant. Answer directly whenever you can.

When you need something you cannot produce in plain text, emit exactly one \
control tag wrapping a short instruction, then stop:
- <SEARCH>query</SEARCH> to look something up on the web. You may emit several \
SEARCH tags at once for independent queries.
- <DEEP>topic</DEEP> for an in-depth, multi-source research report.
- <IMAGE>description</IMAGE> to generate an image.
- <PROJECT>description</PROJECT> to scaffold a multi-file software project.
- <CANVAS_TRIGGER>description</CANVAS_TRIGGER> to open a long-form document in the editor.
- <STUDY>topic</STUDY> to start a guided study session.

Never wrap ordinary answers in tags.";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    base_instructions: String,
    assistant_name: String,
    personality: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        let agent = AgentConfig::default();
        Self {
            base_instructions: DEFAULT_BASE_INSTRUCTIONS.into(),
            assistant_name: agent.name,
            personality: agent.personality,
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            base_instructions: config
                .base_instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_INSTRUCTIONS.into()),
            assistant_name: config.name.clone(),
            personality: config.personality.clone(),
        }
    }

    pub fn with_base_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.base_instructions = instructions.into();
        self
    }

    pub fn with_identity(mut self, name: impl Into<String>, personality: impl Into<String>) -> Self {
        self.assistant_name = name.into();
        self.personality = personality.into();
        self
    }

    /// Assemble the system instruction for one iteration.
    pub fn system_prompt(
        &self,
        thinking: ThinkingMode,
        memory: &MemoryContext,
        search_context: &str,
        now: DateTime<Utc>,
    ) -> String {
        let mut sections = vec![
            self.base_instructions.clone(),
            format!(
                "## Identity\nYour name is {}. {}",
                self.assistant_name, self.personality
            ),
        ];

        let budget = thinking.budget();
        if budget > 0 {
            sections.push(format!(
                "## Reasoning\nThink the problem through carefully before answering. \
                 You may spend up to {budget} tokens on internal reasoning."
            ));
        }

        let memory_block = memory.to_prompt_block();
        if !memory_block.is_empty() {
            sections.push(format!(
                "## What you know about the user\n```json\n{memory_block}\n```"
            ));
        }

        if !search_context.trim().is_empty() {
            sections.push(format!("## Web search context\n{}", search_context.trim_end()));
        }

        sections.push(format!(
            "Current date and time: {}",
            now.format("%A, %B %-d, %Y %H:%M UTC")
        ));

        sections.join("\n\n")
    }

    /// Convert history to messages, dropping a trailing user turn that was
    /// never answered and empty entries.
    pub fn history(entries: &[HistoryEntry]) -> Vec<Message> {
        let entries = match entries.last() {
            Some(last) if last.sender == Sender::User => &entries[..entries.len() - 1],
            _ => entries,
        };

        entries
            .iter()
            .filter(|e| !e.text.trim().is_empty())
            .map(|e| match e.sender {
                Sender::User => Message::user(&e.text),
                Sender::Ai => Message::model(&e.text),
            })
            .collect()
    }

    /// The active prompt plus attachments as one user message.
    ///
    /// Text files become delimited blocks ahead of the prompt; anything else
    /// is sent as base64 inline data.
    pub fn user_message(prompt: &str, attachments: &[Attachment]) -> Message {
        let mut parts: Vec<Part> = attachments.iter().map(attachment_part).collect();
        parts.push(Part::text(prompt));
        Message {
            role: Role::User,
            parts,
        }
    }
}

fn attachment_part(attachment: &Attachment) -> Part {
    if !attachment.is_text() {
        return Part::inline_data(&attachment.mime_type, STANDARD.encode(&attachment.data));
    }

    match std::str::from_utf8(&attachment.data) {
        Ok(content) => Part::text(format!(
            "--- File: {} ---\n{}\n--- End of file: {} ---",
            attachment.name, content, attachment.name
        )),
        Err(e) => {
            warn!(file = %attachment.name, error = %e, "Attachment is not valid UTF-8");
            Part::text(format!(
                "[Attachment '{}' could not be read as text and was skipped.]",
                attachment.name
            ))
        }
    }
}
