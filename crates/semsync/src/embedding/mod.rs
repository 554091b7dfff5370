//! Embedding provider abstraction, adapters, and the embedding service.
//!
//! - [`EmbeddingProvider`]: the adapter contract over an external backend.
//!   Adapters preserve input order and length and never retry.
//! - [`OpenAiProvider`] and [`OllamaProvider`]: HTTP adapters.
//! - [`EmbeddingService`]: cleaning, truncation, batching, pacing, timeout,
//!   and the single retry on top of an adapter.
//!
//! Also provides the vector helpers used by the document store:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].

pub mod error;
pub mod ollama;
pub mod openai;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;

pub use error::EmbeddingError;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use service::{EmbeddingService, EmbeddingSettings, TRUNCATION_MARKER};

/// Uniform capability over a pluggable embedding backend.
///
/// `embed_batch` must return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embeds a batch of texts in a single backend call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embeds one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Provider("Empty embedding response".to_string()))
    }
}

/// Instantiates the adapter selected by `config.provider`.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::from_config(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::from_config(config)?)),
        "disabled" => Err(EmbeddingError::Configuration(
            "embedding provider is disabled".to_string(),
        )),
        other => Err(EmbeddingError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encodes a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodes a BLOB written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or
/// zero-norm vectors.
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
