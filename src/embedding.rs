//! Query embedder implementations.
//!
//! Implements [`QueryEmbedder`] for the providers selectable in
//! `[embedding]`:
//! - **[`DisabledEmbedder`]**: always fails; dense retrieval is unavailable.
//! - **[`OpenAIEmbedder`]**: `POST {url}/embeddings` on an OpenAI-compatible API.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! Each call is a single attempt. Retries and per-attempt timeouts are
//! applied by the retriever through its [`RetryPolicy`](crate::retry::RetryPolicy);
//! the adapters only classify failures (429 and 5xx are transient, other
//! statuses are not).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use campus_assistant_core::embedding::QueryEmbedder;
use campus_assistant_core::error::ExternalError;

use crate::config::EmbeddingConfig;
use crate::http::{build_client, check_status, read_json, transport_error, Limiter};

const SERVICE: &str = "embedder";

/// Instantiates the embedder selected by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn QueryEmbedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl QueryEmbedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, ExternalError> {
        Err(ExternalError::unavailable(
            SERVICE,
            "embedding provider is disabled",
        ))
    }
}

// ============ OpenAI ============

/// Embeddings via an OpenAI-compatible API. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
    limiter: Limiter,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client: build_client(config.timeout_secs)?,
            limiter: Limiter::new(SERVICE, config.max_concurrency),
        })
    }
}

#[async_trait]
impl QueryEmbedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ExternalError> {
        let _permit = self.limiter.acquire().await?;

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let json = read_json(SERVICE, response).await?;

        let vector = parse_openai_response(&json)?;
        check_dims(vector, self.dims)
    }
}

/// Extracts `data[0].embedding`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, ExternalError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| ExternalError::invalid(SERVICE, "missing data[0].embedding"))?;
    parse_vector(embedding)
}

// ============ Ollama ============

/// Embeddings via Ollama's `/api/embed` (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    limiter: Limiter,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: build_client(config.timeout_secs)?,
            limiter: Limiter::new(SERVICE, config.max_concurrency),
        })
    }
}

#[async_trait]
impl QueryEmbedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ExternalError> {
        let _permit = self.limiter.acquire().await?;

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let json = read_json(SERVICE, response).await?;

        let vector = parse_ollama_response(&json)?;
        check_dims(vector, self.dims)
    }
}

/// Extracts `embeddings[0]`.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, ExternalError> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| ExternalError::invalid(SERVICE, "missing embeddings array"))?;
    parse_vector(embedding)
}

// ============ Helpers ============

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>, ExternalError> {
    value
        .as_array()
        .ok_or_else(|| ExternalError::invalid(SERVICE, "embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ExternalError::invalid(SERVICE, "embedding contains a non-number"))
        })
        .collect()
}

fn check_dims(vector: Vec<f32>, dims: usize) -> Result<Vec<f32>, ExternalError> {
    if vector.len() != dims {
        return Err(ExternalError::invalid(
            SERVICE,
            format!("expected {} dimensions, got {}", dims, vector.len()),
        ));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_response() {
        let json = json!({"data": [{"embedding": [0.5, -1.0, 2.0]}]});
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let err = parse_openai_response(&json!({"object": "list"})).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = json!({"model": "nomic", "embeddings": [[1.0, 0.0]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_parse_vector_rejects_strings() {
        assert!(parse_vector(&json!([1.0, "x"])).is_err());
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(vec![0.0; 3], 3).is_ok());
        assert!(check_dims(vec![0.0; 2], 3).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_is_unavailable() {
        let err = DisabledEmbedder.embed_query("hi").await.unwrap_err();
        assert!(matches!(err, ExternalError::Unavailable { .. }));
    }

    #[test]
    fn test_create_embedder_disabled() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
    }
}
