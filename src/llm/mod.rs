//! Model backend adapter.
//!
//! All providers sit behind one call contract: an ordered list of role-tagged messages,
//! a provider selector and that provider's configuration go in, completion text comes
//! out. Provider-specific wire formats live in [`providers`].

mod error;
mod providers;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use providers::HttpBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a message with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Which upstream provider a call goes to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local Ollama server
    #[default]
    Ollama,
    OpenAi,
    Gemini,
    /// OpenAI-compatible router
    OpenRouter,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
        }
    }

    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => "llama3",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Gemini => "gemini-1.5-flash",
            Provider::OpenRouter => "anthropic/claude-sonnet-4.5",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            "openrouter" => Ok(Provider::OpenRouter),
            other => Err(format!(
                "unknown provider '{}' (expected ollama, openai, gemini or openrouter)",
                other
            )),
        }
    }
}

/// Per-provider credentials and model selection.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// API key (unused by Ollama)
    pub api_key: Option<String>,
    /// Model name; falls back to [`Provider::default_model`]
    pub model: Option<String>,
    /// Endpoint override (Ollama URL, self-hosted OpenAI-compatible gateways)
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Resolve the model name for `provider`.
    pub fn model_for(&self, provider: Provider) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string())
    }
}

/// Uniform model call contract.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send the full message list and return the completion text.
    async fn call(
        &self,
        messages: &[ChatMessage],
        provider: Provider,
        config: &ProviderConfig,
    ) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<Provider>(), Ok(Provider::OpenAi));
        assert_eq!(" gemini ".parse::<Provider>(), Ok(Provider::Gemini));
        assert!("claude".parse::<Provider>().is_err());
    }

    #[test]
    fn model_falls_back_to_provider_default() {
        let config = ProviderConfig::default();
        assert_eq!(config.model_for(Provider::Ollama), "llama3");

        let config = ProviderConfig {
            model: Some("qwen2.5-coder".to_string()),
            ..Default::default()
        };
        assert_eq!(config.model_for(Provider::Ollama), "qwen2.5-coder");
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}
