use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::jobs::JobStatus;
use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum SemsyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job {job_id} cannot be claimed (status: {status})")]
    JobNotClaimable { job_id: String, status: JobStatus },

    #[error("Orchestrator is shut down")]
    Shutdown,
}

impl SemsyncError {
    pub fn job_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "Job",
            id: id.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid partition '{key}': {reason}")]
    InvalidPartition { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SemsyncError>;
