//! Configuration loading, validation, and management for Quill.
//!
//! Loads configuration from `~/.quill/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard ceiling on loop iterations per request.
pub const MAX_LOOP_ITERATIONS: u32 = 6;

/// The root configuration structure.
///
/// Maps directly to `~/.quill/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when the request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model substituted when the requested one is unavailable
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Sampling temperature for the native backend
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Native (grounded) backend
    #[serde(default = "default_gemini")]
    pub gemini: ProviderConfig,

    /// OpenAI-compatible backend
    #[serde(default = "default_openai")]
    pub openai: ProviderConfig,

    /// Loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// Search fan-out limits
    #[serde(default)]
    pub search: SearchConfig,

    /// Memory store selection
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_fallback_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_gemini() -> ProviderConfig {
    ProviderConfig {
        api_key: None,
        api_url: Some("https://generativelanguage.googleapis.com/v1beta".into()),
    }
}
fn default_openai() -> ProviderConfig {
    ProviderConfig {
        api_key: None,
        api_url: Some("https://api.openai.com/v1".into()),
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("default_model", &self.default_model)
            .field("fallback_model", &self.fallback_model)
            .field("temperature", &self.temperature)
            .field("gemini", &self.gemini)
            .field("openai", &self.openai)
            .field("agent", &self.agent)
            .field("search", &self.search)
            .field("memory", &self.memory)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Assistant name used in the identity block
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// One-line personality for the identity block
    #[serde(default = "default_personality")]
    pub personality: String,

    /// Replaces the built-in base instructions when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_instructions: Option<String>,

    /// Loop iteration bound (1..=6)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Backoff retries on rate limiting before giving up
    #[serde(default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Model ids matching any of these (prefix or substring) use the native backend
    #[serde(default = "default_native_prefixes")]
    pub native_model_prefixes: Vec<String>,

    /// Memory layers requested once per request
    #[serde(default = "default_memory_layers")]
    pub memory_layers: Vec<String>,
}

fn default_agent_name() -> String {
    "Quill".into()
}
fn default_personality() -> String {
    "A precise, friendly research assistant.".into()
}
fn default_max_iterations() -> u32 {
    MAX_LOOP_ITERATIONS
}
fn default_rate_limit_retries() -> u32 {
    3
}
fn default_native_prefixes() -> Vec<String> {
    vec!["gemini".into(), "gemma".into(), "learnlm".into()]
}
fn default_memory_layers() -> Vec<String> {
    vec!["profile".into(), "preferences".into(), "facts".into()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            personality: default_personality(),
            base_instructions: None,
            max_iterations: default_max_iterations(),
            max_rate_limit_retries: default_rate_limit_retries(),
            native_model_prefixes: default_native_prefixes(),
            memory_layers: default_memory_layers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hits requested per query
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,

    /// Pages fetched per query
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Content fetch deadline; on expiry the batch uses bare snippets
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Per-page content cap in the synthesized prompt
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

fn default_result_limit() -> usize {
    20
}
fn default_fetch_limit() -> usize {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    8
}
fn default_max_content_chars() -> usize {
    4000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            fetch_limit: default_fetch_limit(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSON file holding the memory layers (file backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_memory_backend() -> String {
    "file".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.quill/config.toml).
    ///
    /// Environment variable overrides:
    /// - `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) for the native backend
    /// - `OPENAI_API_KEY` for the OpenAI-compatible backend
    /// - `QUILL_OPENAI_BASE_URL` to point the secondary backend elsewhere
    /// - `QUILL_MODEL` for the default model
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.gemini.api_key.is_none() {
            config.gemini.api_key = std::env::var("GEMINI_API_KEY")
                .ok()
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok());
        }

        if config.openai.api_key.is_none() {
            config.openai.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        if let Ok(url) = std::env::var("QUILL_OPENAI_BASE_URL") {
            config.openai.api_url = Some(url);
        }

        if let Ok(model) = std::env::var("QUILL_MODEL") {
            config.default_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".quill")
    }

    /// Where the file memory store lives unless configured otherwise.
    pub fn memory_path(&self) -> PathBuf {
        self.memory
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("memory.json"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 || self.agent.max_iterations > MAX_LOOP_ITERATIONS {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_iterations must be between 1 and {MAX_LOOP_ITERATIONS}"
            )));
        }

        if self.fallback_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "fallback_model must not be empty".into(),
            ));
        }

        if self.search.result_limit == 0 || self.search.fetch_limit == 0 {
            return Err(ConfigError::ValidationError(
                "search.result_limit and search.fetch_limit must be > 0".into(),
            ));
        }

        if !matches!(self.memory.backend.as_str(), "file" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory backend '{}' (expected 'file' or 'none')",
                self.memory.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            fallback_model: default_fallback_model(),
            temperature: default_temperature(),
            gemini: default_gemini(),
            openai: default_openai(),
            agent: AgentConfig::default(),
            search: SearchConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 6);
        assert_eq!(config.agent.max_rate_limit_retries, 3);
        assert!(config.gemini.api_url.as_deref().unwrap().contains("googleapis"));
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.search.result_limit, config.search.result_limit);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn iteration_bound_cannot_exceed_six() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 7;
        assert!(config.validate().is_err());
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
        config.agent.max_iterations = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_model, "gemini-2.5-flash");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "gpt-4o-mini"

[openai]
api_url = "http://localhost:8000/v1"

[search]
fetch_timeout_secs = 2
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.openai.api_url.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(config.search.fetch_timeout_secs, 2);
        assert_eq!(config.search.result_limit, 20);
        assert_eq!(config.agent.native_model_prefixes[0], "gemini");
    }

    #[test]
    fn unknown_memory_backend_rejected() {
        let mut config = AppConfig::default();
        config.memory.backend = "postgres".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut config = AppConfig::default();
        config.gemini.api_key = Some("AIza-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIza-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gemini-2.5-flash"));
        assert!(toml_str.contains("max_iterations"));
    }
}
