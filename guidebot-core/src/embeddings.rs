//! Embedding providers for semantic retrieval.
//!
//! The remote [`OpenAiEmbedder`] talks to an OpenAI-compatible embeddings
//! endpoint; [`HashEmbedder`] is a deterministic term-hashing embedder used for
//! development and tests. When no provider can be configured the assistant runs
//! without retrieval rather than refusing to start, so [`build_embedder`]
//! returns an `Option`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::completion::{map_http_error, map_transport_error};
use crate::config::EmbeddingConfig;
use crate::error::LlmError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Embed a batch of texts. Fail-soft: a failed batch call yields `None`
    /// for its items instead of aborting the whole run, so one bad API call
    /// does not throw away an otherwise successful ingest.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>>;

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Deterministic term-hashing embedder.
///
/// Terms are lowercased, split on non-alphanumerics, counted, and hashed into
/// buckets; the vector is L2-normalized. No semantic quality, but stable across
/// runs, which is all retrieval tests need.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for term in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *counts.entry(term).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return vector;
        }

        for (term, count) in &counts {
            let bucket = term_hash(term) % self.dimensions;
            vector[bucket] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn term_hash(term: &str) -> usize {
    term.bytes()
        .fold(5381usize, |hash, b| hash.wrapping_mul(33).wrapping_add(b as usize))
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        texts.iter().map(|t| Some(self.embed_sync(t))).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Remote embedder for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    batch_timeout: Duration,
    single_timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            batch_timeout: Duration::from_secs(config.timeout_secs),
            single_timeout: Duration::from_secs(config.single_timeout_secs),
        }
    }

    async fn request_embeddings(
        &self,
        input: serde_json::Value,
        timeout: Duration,
    ) -> Result<Vec<Option<Vec<f32>>>, LlmError> {
        let body = json!({
            "model": self.model,
            "input": input,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("embeddings", timeout.as_secs(), e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_http_error("embeddings", status, &error_body));
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| LlmError::ResponseParse {
                    message: e.to_string(),
                })?;
        parse_embedding_vectors(&body)
    }
}

/// Pull the vectors out of an OpenAI-format embeddings response, ordered by
/// each item's `index` field. An item without an embedding stays `None`.
fn parse_embedding_vectors(
    body: &serde_json::Value,
) -> Result<Vec<Option<Vec<f32>>>, LlmError> {
    let data = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "missing 'data' array in embeddings response".to_string(),
        })?;

    let mut items: Vec<(usize, Option<Vec<f32>>)> = data
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(position);
            let vector = item.get("embedding").and_then(|e| e.as_array()).map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            });
            (index, vector)
        })
        .collect();
    items.sort_by_key(|(index, _)| *index);
    Ok(items.into_iter().map(|(_, vector)| vector).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self
            .request_embeddings(json!(text), self.single_timeout)
            .await?;
        match vectors.pop().flatten() {
            Some(vector) => Ok(vector),
            None => Err(LlmError::ResponseParse {
                message: "embeddings response carried no vector".to_string(),
            }),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match self.request_embeddings(json!(batch), self.batch_timeout).await {
                Ok(mut vectors) => {
                    // Guard against a short response; missing tail items count
                    // as failed.
                    vectors.resize(batch.len(), None);
                    results.append(&mut vectors);
                }
                Err(e) => {
                    warn!(error = %e, items = batch.len(), "Embedding batch failed, skipping its items");
                    results.extend(std::iter::repeat_with(|| None).take(batch.len()));
                }
            }
        }
        results
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Build the configured embedder, or `None` when embeddings are unavailable.
///
/// Unlike the chat model, a missing embedder is not fatal: answers still flow,
/// just without retrieved context. Falling back to the hash embedder silently
/// is not an option here because its vectors would poison a corpus embedded
/// with a real model.
pub fn build_embedder(config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "local" => Some(Arc::new(HashEmbedder::new(config.dimensions))),
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty());
            match api_key {
                Some(key) => Some(Arc::new(OpenAiEmbedder::new(config, key))),
                None => {
                    warn!(
                        env = %config.api_key_env,
                        "Embedding API key not set; running without document retrieval"
                    );
                    None
                }
            }
        }
        other => {
            warn!(provider = %other, "Unknown embedding provider; running without document retrieval");
            None
        }
    }
}
