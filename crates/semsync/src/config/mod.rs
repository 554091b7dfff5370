pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config, KNOWN_PROVIDERS};
pub use schema::{Config, EmbeddingConfig, PartitionConfig, SyncConfig};
