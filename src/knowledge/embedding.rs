//! Text embeddings for the knowledge store and concern dedup.
//!
//! [`OpenAiEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint.
//! [`HashingEmbedder`] is a deterministic local fallback: feature hashing over
//! stemmed content words, L2-normalized. It needs no network and gives the
//! same vectors on every run, which is what offline mode and the tests use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::llm::{handle_response, ModelError};
use crate::text;

/// Dimensions of `text-embedding-3-small`.
pub const OPENAI_EMBEDDING_DIM: usize = 1536;

/// Default width of the hashing embedder.
pub const HASHING_EMBEDDING_DIM: usize = 512;

/// Maximum texts per batch request
const MAX_BATCH_SIZE: usize = 64;

/// Maximum retry attempts for rate limiting
const MAX_RETRIES: u32 = 3;

const BACKOFF_BASE_MS: u64 = 500;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed many texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(ModelError::EmptyResponse)
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Cosine similarity. `None` when either vector has zero norm or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

// ============================================================
// OpenAI-compatible embeddings
// ============================================================

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

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ModelError::NotConfigured(
                "API key cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            model: model.into(),
            base_url: base_url.into(),
        })
    }

    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        debug!(count = texts.len(), model = %self.model, "Requesting embeddings");

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let mut parsed: EmbeddingResponse = handle_response(response).await?;
        if parsed.data.len() != texts.len() {
            return Err(ModelError::Server(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn call_api_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let mut retries = 0;
        loop {
            match self.call_api(texts).await {
                Err(ModelError::RateLimited(msg)) if retries < MAX_RETRIES => {
                    let backoff_ms = BACKOFF_BASE_MS * 2_u64.pow(retries);
                    warn!(
                        "Embedding request rate limited ({}), retrying after {}ms (attempt {}/{})",
                        msg,
                        backoff_ms,
                        retries + 1,
                        MAX_RETRIES
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                    retries += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            vectors.extend(self.call_api_with_retry(batch).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        OPENAI_EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================
// Local hashing embedder
// ============================================================

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed synchronously. Texts without content words map to the zero vector.
    pub fn embed_text(&self, input: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text::content_words(input) {
            let key = text::stem_key(&word);
            let bucket = (text::fnv1a(key.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_EMBEDDING_DIM)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "local-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("Hesitated to ask questions during medication administration");
        let b = embedder.embed_text("Hesitated to ask questions during medication administration");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_groups_inflections() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("hesitation asking questions");
        let b = embedder.embed_text("hesitated asking questions");
        let c = embedder.embed_text("wound dressing technique");
        let close = cosine_similarity(&a, &b).unwrap();
        let far = cosine_similarity(&a, &c).unwrap_or(0.0);
        assert!(close > 0.99);
        assert!(far < close);
    }

    #[test]
    fn stopword_only_text_embeds_to_zero() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_text("the and of").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["hand hygiene".to_string(), "documentation".to_string()];
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors[0], embedder.embed_text("hand hygiene"));
        assert_eq!(vectors[1], embedder.embed_text("documentation"));
    }
}
