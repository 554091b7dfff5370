use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file holding jobs and documents. Falls back to
    /// [`crate::db::default_database_path`].
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionConfig>,
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// One of `disabled`, `openai`, `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_provider() -> String {
    "disabled".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    100
}

fn default_max_chars() -> usize {
    8000
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
            max_chars: default_max_chars(),
            batch_delay_ms: default_batch_delay_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_concurrent_jobs() -> usize {
    num_cpus::get()
}

fn default_event_channel_capacity() -> usize {
    crate::broadcast::DEFAULT_CHANNEL_CAPACITY
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_batch_size: default_batch_size(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Sources feeding one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// SQLite database whose schema is introspected.
    #[serde(default)]
    pub schema_database: Option<String>,
    /// Directory of uploaded text files.
    #[serde(default)]
    pub documents_dir: Option<String>,
    /// JSON file of business entities, metrics, templates, and FAQs.
    #[serde(default)]
    pub entities_file: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
}

fn default_chunk_max_tokens() -> usize {
    700
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            schema_database: None,
            documents_dir: None,
            entities_file: None,
            tenant_id: None,
            chunk_max_tokens: default_chunk_max_tokens(),
        }
    }
}

impl PartitionConfig {
    pub fn has_sources(&self) -> bool {
        self.schema_database.is_some() || self.documents_dir.is_some() || self.entities_file.is_some()
    }
}
