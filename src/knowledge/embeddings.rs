//! Embedding providers
//!
//! The pipeline depends on the `Embedder` trait. `HttpEmbedder` calls
//! an OpenAI-compatible embeddings endpoint and caches vectors;
//! `HashEmbedder` is a deterministic offline fallback used by tests
//! and keyless deployments.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::cache::EmbeddingCache;
use crate::error::{BridgeError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible `/v1/embeddings` client with a 7-day vector cache.
pub struct HttpEmbedder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    cache: Arc<EmbeddingCache>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(api_key: String, model: String, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
            cache,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(&self.model, text) {
            return Ok(cached);
        }

        let response = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "embeddings request failed: {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BridgeError::Protocol("empty embeddings response".to_string()))?;

        debug!(model = %self.model, dims = embedding.len(), "embedding generated");
        self.cache.put(&self.model, text, embedding.clone());
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic token-hash embedder. No network, no key; vectors are
/// stable across runs so cached and uncached retrieval agree.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let index = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        // L2-normalize so cosine scores land in [-1, 1].
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "token-hash"
    }
}
