//! Ollama embeddings adapter (`POST /api/embed`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const DEFAULT_URL: &str = "http://localhost:11434";

/// Calls a local Ollama instance. Does not retry.
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let model = config.model.clone().ok_or_else(|| {
            EmbeddingError::Configuration("embedding.model required for Ollama provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            EmbeddingError::Configuration("embedding.dims required for Ollama provider".to_string())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config
                .url
                .as_deref()
                .unwrap_or(DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            model,
            dims,
        })
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbeddingError::Provider(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Provider(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}
