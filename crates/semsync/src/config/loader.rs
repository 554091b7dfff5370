use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Embedding providers understood by [`crate::embedding::create_provider`].
pub const KNOWN_PROVIDERS: &[&str] = &["disabled", "openai", "ollama"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let embedding = &config.embedding;
    if !KNOWN_PROVIDERS.contains(&embedding.provider.as_str()) {
        return Err(ConfigError::Validation {
            message: format!(
                "Unknown embedding provider '{}' (expected one of: {})",
                embedding.provider,
                KNOWN_PROVIDERS.join(", ")
            ),
        });
    }
    if embedding.provider != "disabled" {
        if embedding.model.as_deref().map_or(true, |m| m.trim().is_empty()) {
            return Err(ConfigError::Validation {
                message: format!("embedding.model is required for provider '{}'", embedding.provider),
            });
        }
        if embedding.dims.map_or(true, |d| d == 0) {
            return Err(ConfigError::Validation {
                message: format!("embedding.dims is required for provider '{}'", embedding.provider),
            });
        }
    }

    for (field, value) in [
        ("embedding.batch_size", embedding.batch_size),
        ("embedding.max_chars", embedding.max_chars),
        ("sync.max_concurrent_jobs", config.sync.max_concurrent_jobs),
        ("sync.default_batch_size", config.sync.default_batch_size),
        ("sync.event_channel_capacity", config.sync.event_channel_capacity),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", field),
            });
        }
    }
    let marker_chars = crate::embedding::TRUNCATION_MARKER.chars().count();
    if embedding.max_chars <= marker_chars {
        return Err(ConfigError::Validation {
            message: format!(
                "embedding.max_chars must be greater than {} to leave room for the truncation marker",
                marker_chars
            ),
        });
    }
    if embedding.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "embedding.timeout_secs must be greater than 0".to_string(),
        });
    }

    for (key, partition) in &config.partitions {
        if key.trim().is_empty() || key == crate::jobs::ALL_PARTITIONS {
            return Err(ConfigError::InvalidPartition {
                key: key.clone(),
                reason: "partition key must be a non-blank name".to_string(),
            });
        }
        if partition.chunk_max_tokens == 0 {
            return Err(ConfigError::InvalidPartition {
                key: key.clone(),
                reason: "chunk_max_tokens must be greater than 0".to_string(),
            });
        }
        if !partition.has_sources() {
            log::warn!("Partition '{}' has no sources configured", key);
        }
    }

    Ok(())
}
