//! Backend selection — picks the primary or secondary provider by model id.
//!
//! Native models (Gemini family by default) go to the primary backend wrapped
//! in a fresh `RetryPolicy`; everything else streams from the
//! OpenAI-compatible backend as-is.

use std::sync::Arc;

use quill_config::AppConfig;
use quill_core::agent::Credentials;
use quill_core::provider::Provider;

use crate::gemini::{self, GeminiProvider};
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{DEFAULT_MAX_RATE_LIMIT_RETRIES, NoticeFn, RetryPolicy};

/// Which backend family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Primary backend with built-in web grounding
    Native,
    /// Secondary OpenAI-compatible backend without grounding
    Alternate,
}

impl BackendKind {
    /// Whether the loop should run its own search batch for this backend.
    pub fn search_eligible(self) -> bool {
        matches!(self, Self::Alternate)
    }
}

/// Classify a model id by prefix/substring match against the native families.
pub fn classify_model(model: &str, native_prefixes: &[String]) -> BackendKind {
    let model = model.to_ascii_lowercase();
    if native_prefixes
        .iter()
        .any(|p| !p.is_empty() && model.contains(&p.to_ascii_lowercase()))
    {
        BackendKind::Native
    } else {
        BackendKind::Alternate
    }
}

/// The backend chosen for one invocation.
pub struct Selection {
    pub provider: Arc<dyn Provider>,
    pub kind: BackendKind,
    /// The model id after defaulting an empty request
    pub model: String,
}

#[derive(Clone)]
struct Endpoints {
    gemini_url: String,
    openai_url: String,
}

/// Both backends plus the rules for choosing between them.
#[derive(Clone)]
pub struct BackendSet {
    primary: Arc<dyn Provider>,
    secondary: Arc<dyn Provider>,
    native_prefixes: Vec<String>,
    default_model: String,
    fallback_model: String,
    max_rate_limit_retries: u32,
    endpoints: Option<Endpoints>,
}

impl BackendSet {
    pub fn new(primary: Arc<dyn Provider>, secondary: Arc<dyn Provider>) -> Self {
        Self {
            primary,
            secondary,
            native_prefixes: vec!["gemini".into(), "gemma".into(), "learnlm".into()],
            default_model: "gemini-2.5-flash".into(),
            fallback_model: "gemini-2.5-flash".into(),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            endpoints: None,
        }
    }

    pub fn with_native_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.native_prefixes = prefixes;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    /// Build both backends from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let gemini_url = config
            .gemini
            .api_url
            .clone()
            .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.into());
        let openai_url = config
            .openai
            .api_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".into());

        let primary = GeminiProvider::new(config.gemini.api_key.clone().unwrap_or_default())
            .with_base_url(&gemini_url);
        let secondary = OpenAiCompatProvider::new(
            "openai",
            &openai_url,
            config.openai.api_key.clone().unwrap_or_default(),
        );

        let mut set = Self::new(Arc::new(primary), Arc::new(secondary))
            .with_native_prefixes(config.agent.native_model_prefixes.clone())
            .with_default_model(&config.default_model)
            .with_fallback_model(&config.fallback_model)
            .with_max_rate_limit_retries(config.agent.max_rate_limit_retries);
        set.endpoints = Some(Endpoints {
            gemini_url,
            openai_url,
        });
        set
    }

    /// Resolve an empty model id to the default.
    pub fn resolve_model(&self, model: &str) -> String {
        if model.trim().is_empty() {
            self.default_model.clone()
        } else {
            model.to_string()
        }
    }

    pub fn kind(&self, model: &str) -> BackendKind {
        classify_model(&self.resolve_model(model), &self.native_prefixes)
    }

    /// Choose the backend for `model`.
    ///
    /// Per-request credentials replace the configured key when the set was
    /// built from configuration.
    pub fn select(
        &self,
        model: &str,
        credentials: &Credentials,
        notice: Option<NoticeFn>,
    ) -> Selection {
        let model = self.resolve_model(model);
        let kind = classify_model(&model, &self.native_prefixes);

        let provider: Arc<dyn Provider> = match kind {
            BackendKind::Native => {
                let inner = match (&self.endpoints, &credentials.gemini_api_key) {
                    (Some(ep), Some(key)) => {
                        Arc::new(GeminiProvider::new(key).with_base_url(&ep.gemini_url))
                            as Arc<dyn Provider>
                    }
                    _ => self.primary.clone(),
                };
                let mut policy =
                    RetryPolicy::new(inner, &self.default_model, &self.fallback_model)
                        .with_max_rate_limit_retries(self.max_rate_limit_retries);
                if let Some(notice) = notice {
                    policy = policy.with_notice(notice);
                }
                Arc::new(policy)
            }
            BackendKind::Alternate => match (&self.endpoints, &credentials.openai_api_key) {
                (Some(ep), Some(key)) => {
                    Arc::new(OpenAiCompatProvider::new("openai", &ep.openai_url, key))
                        as Arc<dyn Provider>
                }
                _ => self.secondary.clone(),
            },
        };

        Selection {
            provider,
            kind,
            model,
        }
    }
}
