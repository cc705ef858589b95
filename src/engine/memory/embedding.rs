// Athena Engine — Embedding Gateway
//
// The model is external: this module only adapts to it. `EmbeddingProvider`
// is the seam (HTTP client in production, deterministic embedders offline and
// in tests). Every call made by the memory manager goes through
// `embed_with_timeout`, which bounds latency and checks the vector shape.

use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::MemoryConfig;

/// text → fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Embed `text`, failing with `EmbeddingTimeout` once `timeout` elapses.
/// The returned vector is guaranteed to have `provider.dimensions()` finite
/// components.
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> EngineResult<Vec<f32>> {
    let vector = tokio::time::timeout(timeout, provider.embed(text))
        .await
        .map_err(|_| {
            warn!("[memory] Embedding via '{}' timed out after {:?}", provider.model_name(), timeout);
            EngineError::EmbeddingTimeout(timeout)
        })??;

    if vector.len() != provider.dimensions() {
        return Err(EngineError::Config(format!(
            "embedding model '{}' returned {} dimensions, expected {}",
            provider.model_name(),
            vector.len(),
            provider.dimensions()
        )));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EngineError::EmbeddingUnavailable(format!(
            "embedding model '{}' returned non-finite values",
            provider.model_name()
        )));
    }
    Ok(vector)
}

fn unavailable(msg: impl Into<String>) -> EngineError {
    EngineError::EmbeddingUnavailable(msg.into())
}

fn parse_vector(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Embedding client — calls Ollama or an OpenAI-compatible embedding API.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl EmbeddingClient {
    pub fn new(config: &MemoryConfig) -> Self {
        EmbeddingClient {
            client: Client::new(),
            base_url: config.embedding_base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
        }
    }

    /// Ollama current API: POST /api/embed { model, input } → { embeddings: [[f32...]] }
    /// Falls back to legacy: POST /api/embeddings { model, prompt } → { embedding: [f32...] }
    async fn embed_ollama(&self, text: &str) -> EngineResult<Vec<f32>> {
        // ── Try new /api/embed endpoint first (Ollama 0.4+) ──
        let new_url = format!("{}/api/embed", self.base_url);
        let new_result = self
            .client
            .post(&new_url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await;

        if let Ok(resp) = new_result {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(first) = v["embeddings"]
                        .as_array()
                        .and_then(|all| all.first())
                        .and_then(|e| e.as_array())
                    {
                        let vec = parse_vector(first);
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                    // Some Ollama versions return singular "embedding" even on /api/embed
                    if let Some(embedding) = v["embedding"].as_array() {
                        let vec = parse_vector(embedding);
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                }
            } else {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.as_u16() == 404 || body.contains("not found") || body.contains("does not exist") {
                    return Err(unavailable(format!("model '{}' not found: {}", self.model, body)));
                }
                info!("[memory] /api/embed returned {} — trying legacy endpoint", status);
            }
        }

        // ── Fall back to legacy /api/embeddings endpoint ──
        let legacy_url = format!("{}/api/embeddings", self.base_url);
        let resp = self
            .client
            .post(&legacy_url)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(|e| unavailable(format!("Ollama not reachable at {}: {}", self.base_url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(unavailable(format!("Ollama embed {status}: {body}")));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("bad Ollama response: {e}")))?;
        let embedding = v["embedding"]
            .as_array()
            .ok_or_else(|| unavailable("no 'embedding' array in Ollama response"))?;
        let vec = parse_vector(embedding);
        if vec.is_empty() {
            return Err(unavailable("empty embedding vector from Ollama"));
        }
        Ok(vec)
    }

    /// OpenAI-compatible format: POST /v1/embeddings { model, input }
    async fn embed_openai(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| unavailable(format!("embedding endpoint not reachable at {}: {}", self.base_url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(unavailable(format!("OpenAI embed {status}: {body}")));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("bad OpenAI response: {e}")))?;
        let embedding = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| unavailable("no 'data[0].embedding' array in OpenAI response"))?;
        let vec = parse_vector(embedding);
        if vec.is_empty() {
            return Err(unavailable("empty embedding vector from OpenAI format"));
        }
        Ok(vec)
    }

    /// Embed a short fixed string and report the vector length.
    pub async fn test_connection(&self) -> EngineResult<usize> {
        let vec = self.embed("test connection").await?;
        Ok(vec.len())
    }

    /// Check if the configured model is available in Ollama.
    pub async fn check_model_available(&self) -> EngineResult<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(unavailable(format!("Ollama /api/tags returned {}", resp.status())));
        }

        let v: Value = resp.json().await?;
        let model_base = self.model.split(':').next().unwrap_or(&self.model);
        let found = v["models"].as_array().is_some_and(|models| {
            models.iter().any(|m| {
                ["name", "model"].iter().any(|field| {
                    m[*field].as_str().is_some_and(|name| {
                        name == self.model || name.split(':').next() == Some(model_base)
                    })
                })
            })
        });
        Ok(found)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    /// Tries Ollama first, falls back to the OpenAI-compatible endpoint.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let ollama_err = match self.embed_ollama(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) => e,
        };
        match self.embed_openai(text).await {
            Ok(vec) => Ok(vec),
            Err(openai_err) => Err(unavailable(format!(
                "Ollama: {ollama_err} | OpenAI: {openai_err}"
            ))),
        }
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
