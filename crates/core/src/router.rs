//! Router collaborator — picks the initial action for a prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::Credentials;
use crate::error::RouterError;

/// The action the loop is currently pursuing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouterAction {
    #[default]
    Simple,
    Search,
    DeepSearch,
    Image,
    Project,
    Canvas,
    Study,
}

impl RouterAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "SIMPLE",
            Self::Search => "SEARCH",
            Self::DeepSearch => "DEEP_SEARCH",
            Self::Image => "IMAGE",
            Self::Project => "PROJECT",
            Self::Canvas => "CANVAS",
            Self::Study => "STUDY",
        }
    }
}

impl std::fmt::Display for RouterAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The router's verdict for a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub action: RouterAction,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Classifies a prompt into its initial action. Consulted once per request.
#[async_trait]
pub trait ActionRouter: Send + Sync {
    async fn classify(
        &self,
        prompt: &str,
        user_id: &str,
        credentials: &Credentials,
        file_count: usize,
    ) -> Result<RouteDecision, RouterError>;
}

/// A router that always returns the same action.
#[derive(Debug, Clone, Default)]
pub struct StaticRouter {
    action: RouterAction,
}

impl StaticRouter {
    pub fn new(action: RouterAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl ActionRouter for StaticRouter {
    async fn classify(
        &self,
        _prompt: &str,
        _user_id: &str,
        _credentials: &Credentials,
        _file_count: usize,
    ) -> Result<RouteDecision, RouterError> {
        Ok(RouteDecision {
            action: self.action,
            parameters: serde_json::Value::Null,
        })
    }
}
