//! HTTP backend covering every supported provider, with automatic retry for transient errors.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{LlmError, RetryConfig};
use super::{ChatMessage, ModelBackend, Provider, ProviderConfig, Role};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const OLLAMA_DEFAULT_URL: &str = "http://127.0.0.1:11434";

/// A fully built provider request.
struct PreparedRequest {
    url: String,
    bearer: Option<String>,
    body: Value,
}

/// Model backend speaking each provider's HTTP wire format.
pub struct HttpBackend {
    client: Client,
    retry_config: RetryConfig,
}

impl HttpBackend {
    /// Create a backend with default retry configuration.
    pub fn new() -> Self {
        Self::with_retry_config(RetryConfig::default())
    }

    /// Create a backend with custom retry configuration.
    pub fn with_retry_config(retry_config: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            retry_config,
        }
    }

    /// List the models installed on a local Ollama server.
    pub async fn list_local_models(&self, config: &ProviderConfig) -> Result<Vec<String>, LlmError> {
        let provider = Provider::Ollama.as_str();
        let url = format!("{}/api/tags", ollama_base(config));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(provider, &e))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(LlmError::from_status(provider, status.as_u16(), body, None));
        }
        Self::parse_model_tags(&body)
    }

    fn parse_model_tags(body: &str) -> Result<Vec<String>, LlmError> {
        let parsed: OllamaTags = serde_json::from_str(body).map_err(|e| {
            LlmError::parse_error(Provider::Ollama.as_str(), format!("{}: {}", e, body))
        })?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn prepare(
        messages: &[ChatMessage],
        provider: Provider,
        config: &ProviderConfig,
    ) -> Result<PreparedRequest, LlmError> {
        let model = config.model_for(provider);
        match provider {
            Provider::Ollama => Ok(PreparedRequest {
                url: format!("{}/api/chat", ollama_base(config)),
                bearer: None,
                body: json!({
                    "model": model,
                    "messages": messages,
                    "stream": false,
                    "options": { "temperature": 0 }
                }),
            }),
            Provider::OpenAi | Provider::OpenRouter => {
                let key = require_key(provider, config)?;
                let default_url = if provider == Provider::OpenAi {
                    OPENAI_API_URL
                } else {
                    OPENROUTER_API_URL
                };
                Ok(PreparedRequest {
                    url: config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| default_url.to_string()),
                    bearer: Some(key),
                    body: serde_json::to_value(OpenAiRequest {
                        model,
                        messages: messages.to_vec(),
                        temperature: 0.1,
                    })
                    .map_err(|e| LlmError::parse_error(provider.as_str(), e.to_string()))?,
                })
            }
            Provider::Gemini => {
                let key = require_key(provider, config)?;
                let base = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| GEMINI_API_BASE.to_string());
                Ok(PreparedRequest {
                    url: format!("{}/{}:generateContent?key={}", base, model, key),
                    bearer: None,
                    body: gemini_body(messages),
                })
            }
        }
    }

    fn extract_text(provider: Provider, body: &str) -> Result<String, LlmError> {
        let name = provider.as_str();
        let malformed = |e: serde_json::Error| {
            LlmError::parse_error(name, format!("Failed to parse response: {}, body: {}", e, body))
        };

        let text = match provider {
            Provider::Ollama => {
                let parsed: OllamaResponse = serde_json::from_str(body).map_err(malformed)?;
                Some(parsed.message.content)
            }
            Provider::OpenAi | Provider::OpenRouter => {
                let parsed: OpenAiResponse = serde_json::from_str(body).map_err(malformed)?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
            }
            Provider::Gemini => {
                let parsed: GeminiResponse = serde_json::from_str(body).map_err(malformed)?;
                parsed
                    .candidates
                    .into_iter()
                    .next()
                    .and_then(|c| c.content.parts.into_iter().next())
                    .map(|p| p.text)
            }
        };

        text.ok_or_else(|| LlmError::parse_error(name, format!("No completion in response: {}", body)))
    }

    /// Execute a single request without retry.
    async fn execute_request(
        &self,
        provider: Provider,
        request: &PreparedRequest,
    ) -> Result<String, LlmError> {
        let name = provider.as_str();
        let mut builder = self
            .client
            .post(&request.url)
            .header("Content-Type", "application/json")
            .json(&request.body);
        if let Some(key) = &request.bearer {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        if provider == Provider::OpenRouter {
            builder = builder.header("X-Title", "workbench");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::from_transport(name, &e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(name, status.as_u16(), body, retry_after));
        }

        Self::extract_text(provider, &body)
    }

    /// Execute a request with automatic retry for transient errors.
    async fn execute_with_retry(
        &self,
        provider: Provider,
        request: &PreparedRequest,
    ) -> Result<String, LlmError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            let error = match self.execute_request(provider, request).await {
                Ok(text) => {
                    if attempt > 0 {
                        tracing::info!(
                            "{} request succeeded after {} retries ({:?})",
                            provider,
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(text);
                }
                Err(error) => error,
            };

            if !self.retry_config.should_retry(&error, attempt) {
                tracing::error!("{} request failed after {} retries: {}", provider, attempt, error);
                return Err(error);
            }

            let remaining = self
                .retry_config
                .max_retry_duration
                .saturating_sub(start.elapsed());
            let delay = error.suggested_delay(attempt).min(remaining);
            if delay.is_zero() {
                tracing::warn!("{} retry budget exhausted: {}", provider, error);
                return Err(error);
            }

            tracing::warn!(
                "{} attempt {} failed with {}, retrying in {:?}",
                provider,
                attempt + 1,
                error.kind,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn call(
        &self,
        messages: &[ChatMessage],
        provider: Provider,
        config: &ProviderConfig,
    ) -> Result<String, LlmError> {
        let request = Self::prepare(messages, provider, config)?;
        tracing::debug!(
            "Sending {} messages to {} (model={})",
            messages.len(),
            provider,
            config.model_for(provider)
        );
        self.execute_with_retry(provider, &request).await
    }
}

fn require_key(provider: Provider, config: &ProviderConfig) -> Result<String, LlmError> {
    config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| LlmError::not_configured(provider.as_str(), "missing API key"))
}

fn ollama_base(config: &ProviderConfig) -> String {
    config
        .base_url
        .clone()
        .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Parse Retry-After header (seconds form) if present.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Gemini takes system text separately and calls the assistant role `model`.
fn gemini_body(messages: &[ChatMessage]) -> Value {
    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let system_text: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut body = json!({ "contents": contents });
    if !system_text.is_empty() {
        body["system_instruction"] = json!({ "parts": [{ "text": system_text.join("\n\n") }] });
    }
    body
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: String,
}
