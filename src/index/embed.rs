//! Embedding backend for the semantic index.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::llm::LlmError;

const PROVIDER: &str = "voyage";

/// Turns text into vectors. Failures are backend errors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse_error(PROVIDER, "No embedding returned"))
    }
}

/// Client for an OpenAI-style `/embeddings` endpoint (Voyage by default).
pub struct EmbeddingClient {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl EmbeddingClient {
    pub fn new(api_key: String, model: String, url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            url,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(PROVIDER, &e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::from_transport(PROVIDER, &e))?;

        if !status.is_success() {
            tracing::error!("Embedding API error: {} - {}", status, text);
            return Err(LlmError::from_status(PROVIDER, status.as_u16(), text, None));
        }

        let embeddings = parse_embeddings(&text)?;
        if embeddings.len() != texts.len() {
            return Err(LlmError::parse_error(
                PROVIDER,
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    embeddings.len()
                ),
            ));
        }
        Ok(embeddings)
    }
}

fn parse_embeddings(body: &str) -> Result<Vec<Vec<f32>>, LlmError> {
    let response: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(
            PROVIDER,
            format!("Failed to parse embedding response: {} - {}", e, body),
        )
    })?;

    // The API may return items out of order.
    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_ordered_by_index() {
        let body = r#"{"data":[
            {"embedding":[0.0,1.0],"index":1},
            {"embedding":[1.0,0.0],"index":0}
        ],"model":"voyage-code-2"}"#;
        let out = parse_embeddings(body).unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let err = parse_embeddings("not json").unwrap_err();
        assert_eq!(err.kind, crate::llm::LlmErrorKind::ParseError);
    }
}
