//! Embedding backends.
//!
//! - `OpenAiEmbedder`: OpenAI embeddings endpoint (needs an OpenAI key).
//! - `NoopEmbedder`: no embeddings; retrieval falls back to BM25 keyword scoring.

use async_trait::async_trait;
use ndarray::Array1;
use reqwest::{Client, StatusCode};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use docchat_core::{Error, Result};

pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const EMBEDDING_BATCH: usize = 96;

/// Trait for embedding backends.
#[async_trait]
pub trait EmbedderBackend: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Array1<f32>>>;

    async fn embed(&self, text: &str) -> Result<Array1<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("Embedder returned no vectors".into()))
    }

    /// Check if the embedder can produce vectors.
    fn is_available(&self) -> bool;

    /// Stable label for the backend and credential, used in cache keys so
    /// an index is never shared across different credentials.
    fn identity(&self) -> String;
}

/// OpenAI embeddings over HTTP.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiEmbedder {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            url: OPENAI_EMBEDDINGS_URL.into(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl EmbedderBackend for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBEDDING_BATCH) {
            debug!("Embedding {} texts with {}", batch.len(), self.model);

            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&json!({ "model": self.model, "input": batch }))
                .send()
                .await
                .map_err(|e| Error::Http(format!("Embedding request failed: {}", e)))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(Error::Credential("OpenAI".into()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Http(format!("Embedding API error {}: {}", status, body)));
            }

            let parsed: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::Http(format!("Invalid embedding response: {}", e)))?;
            vectors.extend(parse_embeddings(&parsed, batch.len())?);
        }

        Ok(vectors)
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn identity(&self) -> String {
        if !self.is_available() {
            return "keyword".into();
        }
        let digest = Sha256::digest(self.api_key.trim().as_bytes());
        format!("openai:{}:{}", self.model, &hex::encode(digest)[..16])
    }
}

fn parse_embeddings(body: &serde_json::Value, expected: usize) -> Result<Vec<Array1<f32>>> {
    let data = body["data"]
        .as_array()
        .ok_or_else(|| Error::Http("Embedding response has no data".into()))?;

    let mut indexed: Vec<(usize, Array1<f32>)> = data
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let index = item["index"].as_u64().map(|v| v as usize).unwrap_or(i);
            let values = item["embedding"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                .unwrap_or_default();
            (index, Array1::from_vec(values))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(Error::Http(format!(
            "Expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Placeholder embedder for keyword-only retrieval.
pub struct NoopEmbedder;

#[async_trait]
impl EmbedderBackend for NoopEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Array1<f32>>> {
        Err(Error::Internal("No embedder configured".into()))
    }

    fn is_available(&self) -> bool {
        false
    }

    fn identity(&self) -> String {
        "keyword".into()
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    a.dot(b) / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cosine_similarity() {
        let a = array![1.0, 0.0];
        let b = array![0.0, 1.0];
        assert!(cosine_similarity(&a, &a) > 0.999);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &array![0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &array![1.0]), 0.0);
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let body = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_embeddings(&body, 2).unwrap();
        assert_eq!(vectors[0], array![1.0, 0.0]);
        assert_eq!(vectors[1], array![0.0, 1.0]);
        assert!(parse_embeddings(&body, 3).is_err());
    }

    #[tokio::test]
    async fn test_noop_embedder_unavailable() {
        let embedder = NoopEmbedder;
        assert!(!embedder.is_available());
        assert!(embedder.embed("hello").await.is_err());
        assert_eq!(embedder.identity(), "keyword");
    }

    #[test]
    fn test_identity_depends_on_key() {
        let client = Client::new();
        let a = OpenAiEmbedder::new(client.clone(), "sk-alice");
        let b = OpenAiEmbedder::new(client.clone(), "sk-bob");
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity(), OpenAiEmbedder::new(client.clone(), "sk-alice").identity());
        assert!(!a.identity().contains("sk-alice"));
        assert_eq!(OpenAiEmbedder::new(client, "  ").identity(), "keyword");
    }
}
