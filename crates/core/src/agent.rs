//! Request-level types shared by the loop and its collaborators.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Latency/depth tradeoff selected by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// Fastest answer, no reasoning budget
    Instant,
    /// Moderate reasoning budget
    Think,
    /// Large reasoning budget
    Deep,
    /// Backend default (default)
    #[default]
    Normal,
}

impl ThinkingMode {
    /// Internal reasoning-token budget for this mode. Zero means "no directive".
    pub fn budget(self) -> u32 {
        match self {
            Self::Instant | Self::Normal => 0,
            Self::Think => 8_192,
            Self::Deep => 24_576,
        }
    }
}

impl FromStr for ThinkingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "think" => Ok(Self::Think),
            "deep" => Ok(Self::Deep),
            "normal" | "" => Ok(Self::Normal),
            other => Err(format!(
                "unknown thinking mode '{other}' (expected instant, think, deep or normal)"
            )),
        }
    }
}

/// Per-request credentials handed to collaborators.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |k: &Option<String>| if k.is_some() { "[REDACTED]" } else { "None" };
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .finish()
    }
}

/// Who wrote a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// One entry of the prior conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub text: String,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Ai,
            text: text.into(),
        }
    }
}

/// A file attached to the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Plain or marked-up text that is inlined as a delimited file block.
    pub fn is_text(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        mime.starts_with("text/")
            || matches!(
                mime.as_str(),
                "application/json"
                    | "application/xml"
                    | "application/x-yaml"
                    | "application/yaml"
                    | "application/toml"
                    | "application/javascript"
            )
    }
}
