use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{MemoryError, Result};

/// Produces embedding vectors for memory content and queries (spec §4.5
/// step 3). Implementations must return vectors of a consistent, fixed
/// dimension matching the configured `vec0` table.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Tracks whether an Ollama model pull has already been attempted this
/// process, so a missing model only triggers one pull per run.
static MODEL_PULL_ATTEMPTED: AtomicBool = AtomicBool::new(false);

/// Calls Ollama's embedding API, falling back to an OpenAI-compatible
/// `/v1/embeddings` endpoint. Auto-pulls the configured model from Ollama
/// once if the first request reports it missing.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Ollama's current API (`/api/embed`), falling back to the legacy
    /// `/api/embeddings` shape for older daemons.
    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>> {
        let new_url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let new_body = json!({ "model": self.model, "input": text });

        if let Ok(resp) = self
            .client
            .post(&new_url)
            .json(&new_body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
        {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(vec) = v["embeddings"][0]
                        .as_array()
                        .or_else(|| v["embedding"].as_array())
                        .map(parse_f32_array)
                    {
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                }
            } else {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.as_u16() == 404 || body.contains("not found") {
                    return Err(MemoryError::Embedding(format!(
                        "model '{}' not found: {body}",
                        self.model
                    )));
                }
            }
        }

        let legacy_url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let legacy_body = json!({ "model": self.model, "prompt": text });
        let resp = self
            .client
            .post(&legacy_url)
            .json(&legacy_body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(format!("ollama unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!("ollama {status}: {body}")));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let vec = v["embedding"]
            .as_array()
            .map(parse_f32_array)
            .ok_or_else(|| MemoryError::Embedding("no embedding array in response".into()))?;
        if vec.is_empty() {
            return Err(MemoryError::Embedding("empty embedding vector".into()));
        }
        Ok(vec)
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!("openai {status}: {body}")));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let vec = v["data"][0]["embedding"]
            .as_array()
            .map(parse_f32_array)
            .ok_or_else(|| MemoryError::Embedding("no data[0].embedding in response".into()))?;
        if vec.is_empty() {
            return Err(MemoryError::Embedding("empty embedding vector".into()));
        }
        Ok(vec)
    }

    async fn pull_model(&self) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url.trim_end_matches('/'));
        let body = json!({ "name": self.model, "stream": false });
        tracing::info!(model = %self.model, "pulling embedding model from ollama");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(600))
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!("pull {status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.embed_ollama(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) => {
                let not_found = e.to_string().contains("not found");
                if not_found && !MODEL_PULL_ATTEMPTED.swap(true, Ordering::SeqCst) {
                    if self.pull_model().await.is_ok() {
                        if let Ok(vec) = self.embed_ollama(text).await {
                            return Ok(vec);
                        }
                    }
                }
            }
        }
        self.embed_openai(text).await
    }
}

fn parse_f32_array(values: &[Value]) -> Vec<f32> {
    values.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect()
}

/// Deterministic, non-network embedder for tests: hashes the text into a
/// fixed-dimension vector so cosine similarity is stable and reproducible.
pub struct EchoEmbeddingClient {
    dim: usize,
}

impl EchoEmbeddingClient {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingClient for EchoEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            vec[i % self.dim] += byte as f32;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vec.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_client_is_deterministic_and_normalized() {
        let client = EchoEmbeddingClient::new(16);
        let a = client.embed("hello world").await.unwrap();
        let b = client.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn echo_client_differs_for_different_text() {
        let client = EchoEmbeddingClient::new(16);
        let a = client.embed("hello").await.unwrap();
        let b = client.embed("goodbye").await.unwrap();
        assert_ne!(a, b);
    }
}
