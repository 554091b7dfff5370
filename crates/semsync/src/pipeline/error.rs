use thiserror::Error;

use crate::db::DatabaseError;
use crate::embedding::EmbeddingError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// One target could not be processed; the phase carries on without it.
    #[error("Target {target} failed: {reason}")]
    Target { target: String, reason: String },

    #[error("Phase '{phase}' failed: {reason}")]
    Phase { phase: &'static str, reason: String },

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store failed: {0}")]
    Store(#[from] DatabaseError),
}

impl PipelineError {
    pub fn phase(phase: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Phase {
            phase,
            reason: reason.to_string(),
        }
    }

    /// Whether the error is confined to a single target and not fatal to
    /// the job.
    pub fn is_target_scoped(&self) -> bool {
        matches!(self, PipelineError::Target { .. })
    }
}
