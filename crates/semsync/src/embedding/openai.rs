//! OpenAI embeddings adapter (`POST /v1/embeddings`).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Calls the OpenAI embeddings API. Does not retry.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    dims: usize,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Builds the adapter from configuration, reading the API key from
    /// `OPENAI_API_KEY`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| {
                EmbeddingError::Configuration(format!("{} environment variable not set", API_KEY_ENV))
            })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: SecretString) -> Result<Self, EmbeddingError> {
        let model = config.model.clone().ok_or_else(|| {
            EmbeddingError::Configuration("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            EmbeddingError::Configuration("embedding.dims required for OpenAI provider".to_string())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            dims,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Orders response items by `index` and checks that every input got a vector.
fn parse_response(
    response: EmbeddingsResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut items = response.data;
    items.sort_by_key(|item| item.index);
    if items.len() != expected || items.iter().enumerate().any(|(i, item)| item.index != i) {
        return Err(EmbeddingError::Provider(format!(
            "OpenAI returned {} embeddings for {} inputs",
            items.len(),
            expected
        )));
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
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
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        parse_response(parsed, texts.len())
    }
}
