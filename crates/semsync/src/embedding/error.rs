use thiserror::Error;

/// Errors from embedding providers and the embedding service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Blank text was passed to embed. Never retried.
    #[error("Cannot embed empty or blank text")]
    EmptyInput,

    /// No usable provider could be constructed. Never retried.
    #[error("Embedding configuration error: {0}")]
    Configuration(String),

    /// Transport, auth, rate-limit, timeout, or malformed-response failure.
    #[error("Embedding provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        EmbeddingError::Provider(e.to_string())
    }
}
