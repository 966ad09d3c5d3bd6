//! Message domain types.
//!
//! A [`Message`] is one turn of the conversation sent to a backend. The shape
//! follows the primary backend's protocol (a role plus ordered parts); the
//! secondary backend flattens it into plain chat messages.

use serde::{Deserialize, Serialize};

/// The role of a message sender as the backends see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Model,
}

/// One piece of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text
    Text { text: String },
    /// Binary data inlined as base64 (images and other binary attachments)
    InlineData { mime_type: String, data: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// The text of this part, if it is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::InlineData { .. } => None,
        }
    }
}

/// A single message in the request history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<Part>,
}

impl Message {
    /// Create a new user message with a single text part.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(content)],
        }
    }

    /// Create a new model message with a single text part.
    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(content)],
        }
    }

    /// Append a part to this message.
    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// All text parts joined together; binary parts are skipped.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}
