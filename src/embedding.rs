//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and the [`OpenAiEmbedder`], which calls
//! any OpenAI-compatible `POST {url}/embeddings` endpoint with retry and
//! exponential backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Result of one embedding call.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// Model identifier reported by the service.
    pub model: String,
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
}

/// An embedding backend.
///
/// Implementations must return exactly one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier requested from the backend.
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Embedding>;
}

/// Build the embedder selected by `[embedding] provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let result = embedder.embed(&[text.to_string()]).await?;
    result
        .vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ OpenAI-compatible Provider ============

/// Embedding client for OpenAI-compatible APIs.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Create a client from configuration.
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`; a missing key is allowed for local, unauthenticated
    /// gateways.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    model: Option<String>,
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedding> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(format!("{}/embeddings", self.url))
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await?;
                        return into_embedding(parsed, &self.model, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Order vectors by their reported index and check the count.
fn into_embedding(response: EmbeddingResponse, model: &str, expected: usize) -> Result<Embedding> {
    let mut data = response.data;
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }

    if data.len() != expected {
        bail!(
            "Embedding API returned {} vectors for {} inputs",
            data.len(),
            expected
        );
    }

    Ok(Embedding {
        model: response
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| model.to_string()),
        vectors: data.into_iter().map(|d| d.embedding).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_mismatched() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_response_reordered_by_index() {
        let json = r#"{
            "model": "text-embedding-3-small",
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let emb = into_embedding(parsed, "fallback", 2).unwrap();
        assert_eq!(emb.model, "text-embedding-3-small");
        assert_eq!(emb.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_count_mismatch_is_error() {
        let json = r#"{"data": [{"embedding": [1.0]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let err = into_embedding(parsed, "m", 3).unwrap_err();
        assert!(err.to_string().contains("1 vectors for 3 inputs"));
    }

    #[test]
    fn test_missing_model_falls_back_to_requested() {
        let json = r#"{"data": [{"embedding": [1.0]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(into_embedding(parsed, "m", 1).unwrap().model, "m");
    }
}
