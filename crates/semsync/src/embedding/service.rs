//! Embedding service: provider-agnostic cleaning, batching, and pacing.

use std::sync::Arc;
use std::time::Duration;

use super::{create_provider, EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

/// Appended to texts cut at the character budget.
pub const TRUNCATION_MARKER: &str = " [truncated]";

/// Tunables for [`EmbeddingService`].
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Character budget per text, marker included.
    pub max_chars: usize,
    /// Maximum texts per provider call.
    pub batch_size: usize,
    /// Pause between consecutive provider calls in `embed_many`.
    pub batch_delay: Duration,
    /// Upper bound on a single provider call.
    pub timeout: Duration,
    /// Wait before the single retry of a failed call.
    pub retry_backoff: Duration,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            batch_size: 100,
            batch_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl From<&EmbeddingConfig> for EmbeddingSettings {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_chars: config.max_chars,
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Wraps an [`EmbeddingProvider`] with input sanitation and call policy.
///
/// Every provider call is bounded by `settings.timeout`; a timeout or
/// provider failure is retried once after `settings.retry_backoff`.
#[derive(Clone)]
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    settings: EmbeddingSettings,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: EmbeddingSettings) -> Self {
        Self { provider, settings }
    }

    /// Builds the service with the provider selected by configuration.
    /// Fails with [`EmbeddingError::Configuration`] if none can be built.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let provider = create_provider(config)?;
        tracing::info!(
            provider = %config.provider,
            model = provider.model_name(),
            dims = provider.dims(),
            "Embedding service ready"
        );
        Ok(Self::new(provider, EmbeddingSettings::from(config)))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn settings(&self) -> &EmbeddingSettings {
        &self.settings
    }

    /// Collapses whitespace runs, rejects blank input, and truncates to
    /// the character budget.
    pub fn clean_text(&self, text: &str) -> Result<String, EmbeddingError> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        if normalized.chars().count() <= self.settings.max_chars {
            return Ok(normalized);
        }

        let max_chars = self.settings.max_chars;
        let marker_chars = TRUNCATION_MARKER.chars().count();
        if max_chars <= marker_chars {
            // No room for content next to the marker.
            return Ok(normalized.chars().take(max_chars).collect());
        }
        let mut truncated: String = normalized.chars().take(max_chars - marker_chars).collect();
        truncated.push_str(TRUNCATION_MARKER);
        Ok(truncated)
    }

    /// Embeds a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let cleaned = self.clean_text(text)?;
        self.call_provider(&[cleaned])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Provider("Empty embedding response".to_string()))
    }

    /// Embeds one prepared batch in a single provider call.
    ///
    /// Unlike [`embed_many`](Self::embed_many) every entry must be non-blank;
    /// the output lines up index for index with `texts`.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let cleaned = texts
            .iter()
            .map(|t| self.clean_text(t))
            .collect::<Result<Vec<_>, _>>()?;
        self.call_provider(&cleaned).await
    }

    /// Embeds any number of texts. Blank entries are dropped first; the
    /// result follows the order of the remaining texts. An empty or
    /// all-blank input returns without touching the provider.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let cleaned: Vec<String> = texts
            .iter()
            .filter_map(|t| self.clean_text(t).ok())
            .collect();
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(cleaned.len());
        for (i, batch) in cleaned.chunks(self.settings.batch_size.max(1)).enumerate() {
            if i > 0 {
                self.pace().await;
            }
            vectors.extend(self.call_provider(batch).await?);
        }
        Ok(vectors)
    }

    /// Sleeps for the configured inter-batch delay.
    pub async fn pace(&self) {
        if !self.settings.batch_delay.is_zero() {
            tokio::time::sleep(self.settings.batch_delay).await;
        }
    }

    async fn call_provider(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut last_err = None;

        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.settings.retry_backoff).await;
            }

            let result =
                tokio::time::timeout(self.settings.timeout, self.provider.embed_batch(texts)).await;
            let err = match result {
                Ok(Ok(vectors)) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(Ok(vectors)) => EmbeddingError::Provider(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    texts.len()
                )),
                Ok(Err(EmbeddingError::Provider(msg))) => EmbeddingError::Provider(msg),
                Ok(Err(other)) => return Err(other),
                Err(_) => EmbeddingError::Provider(format!(
                    "provider call timed out after {:?}",
                    self.settings.timeout
                )),
            };

            tracing::warn!(
                attempt = attempt + 1,
                batch_len = texts.len(),
                error = %err,
                "Embedding provider call failed"
            );
            last_err = Some(err);
        }

        Err(last_err
            .unwrap_or_else(|| EmbeddingError::Provider("embedding failed after retry".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns `[len, index]` per text; fails the first `fail_first` calls.
    struct Scripted {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Scripted {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(EmbeddingError::Provider("rate limited".to_string()));
            }
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, t)| vec![t.len() as f32, i as f32])
                .collect())
        }
    }

    fn settings() -> EmbeddingSettings {
        EmbeddingSettings {
            max_chars: 40,
            batch_size: 2,
            batch_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_clean_text_normalizes_whitespace() {
        let service = EmbeddingService::new(Scripted::new(0), settings());
        assert_eq!(
            service.clean_text("  orders \n\t table  ").unwrap(),
            "orders table"
        );
        assert_eq!(service.clean_text("   "), Err(EmbeddingError::EmptyInput));
        assert_eq!(service.clean_text(""), Err(EmbeddingError::EmptyInput));
    }

    #[test]
    fn test_clean_text_truncates_with_marker() {
        let service = EmbeddingService::new(Scripted::new(0), settings());
        let long = "é".repeat(100);
        let cleaned = service.clean_text(&long).unwrap();
        assert!(cleaned.ends_with(TRUNCATION_MARKER));
        assert_eq!(cleaned.chars().count(), 40);
    }

    #[test]
    fn test_clean_text_small_budget_skips_marker() {
        let service = EmbeddingService::new(
            Scripted::new(0),
            EmbeddingSettings {
                max_chars: 5,
                ..settings()
            },
        );
        assert_eq!(service.clean_text("customer orders").unwrap(), "custo");
    }

    #[tokio::test]
    async fn test_embed_one_rejects_blank() {
        let provider = Scripted::new(0);
        let service = EmbeddingService::new(provider.clone(), settings());
        assert_eq!(
            service.embed_one(" \n ").await,
            Err(EmbeddingError::EmptyInput)
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embed_many_batches_and_skips_blanks() {
        let provider = Scripted::new(0);
        let service = EmbeddingService::new(provider.clone(), settings());
        let texts: Vec<String> = ["a", " ", "bb", "ccc", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = service.embed_many(&texts).await.unwrap();
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0]);
        // Three non-blank texts at batch size two.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let provider = Scripted::new(1);
        let service = EmbeddingService::new(provider.clone(), settings());
        let vectors = service.embed_batch(&["x".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_two_failures_escalate() {
        let provider = Scripted::new(2);
        let service = EmbeddingService::new(provider.clone(), settings());
        let result = service.embed_batch(&["x".to_string()]).await;
        assert!(matches!(result, Err(EmbeddingError::Provider(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
