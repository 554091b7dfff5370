pub mod broadcast;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod worker;

pub use broadcast::{JobEvent, JobEventBus, JobEventReceiver, SubscriptionId};
pub use catalog::{
    CatalogError, DirectoryCatalog, EntityCatalog, PartitionCatalog, SourceCatalog,
    SqliteSchemaCatalog, SyncScope, SyncTarget,
};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use embedding::{EmbeddingError, EmbeddingProvider, EmbeddingService, EmbeddingSettings};
pub use error::{ConfigError, Result, SemsyncError};
pub use jobs::{Job, JobResults, JobStatus, JobStore, JobType, NewJob, SyncOptions, TargetType};
pub use logging::init_tracing;
pub use pipeline::{PipelineError, SyncOutcome, SyncPipeline};
pub use store::{Document, DocumentDraft, DocumentKey, ResourceType, SqliteVectorStore, VectorStore};
pub use worker::{CancelFlag, SyncOrchestrator};
