//! Orchestrator harness over an in-memory database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use semsync::broadcast::{JobEvent, JobEventBus, JobEventReceiver};
use semsync::db::Database;
use semsync::embedding::{EmbeddingService, EmbeddingSettings};
use semsync::jobs::{Job, JobStore, NewJob};
use semsync::pipeline::SyncPipeline;
use semsync::store::{Document, SearchFilter, SqliteVectorStore, VectorStore};
use semsync::worker::SyncOrchestrator;

use super::mocks::{MockProvider, StaticCatalog};

/// Isolated orchestrator with scripted provider and catalog.
pub struct TestHarness {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub provider: Arc<MockProvider>,
    pub catalog: Arc<StaticCatalog>,
    pub store: Arc<SqliteVectorStore>,
}

impl TestHarness {
    /// Batches of one document, no pacing, no retry backoff.
    pub fn new(catalog: StaticCatalog, provider: MockProvider) -> Self {
        Self::with_settings(catalog, provider, fast_settings())
    }

    pub fn with_settings(
        catalog: StaticCatalog,
        provider: MockProvider,
        settings: EmbeddingSettings,
    ) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let provider = Arc::new(provider);
        let catalog = Arc::new(catalog);
        let store = Arc::new(SqliteVectorStore::new(db.clone()));

        let pipeline = SyncPipeline::new(
            catalog.clone(),
            store.clone(),
            EmbeddingService::new(provider.clone(), settings),
        );
        let orchestrator = Arc::new(SyncOrchestrator::new(
            JobStore::new(db),
            Arc::new(JobEventBus::default()),
            pipeline,
            2,
        ));

        Self {
            orchestrator,
            provider,
            catalog,
            store,
        }
    }

    /// Creates and runs a job to its terminal state.
    pub async fn run(&self, new_job: NewJob) -> Job {
        let job = self
            .orchestrator
            .create_job(&new_job)
            .expect("Failed to create job");
        self.orchestrator
            .run_job(&job.id)
            .await
            .expect("Failed to run job")
    }

    pub fn subscribe(&self, partition_key: &str) -> JobEventReceiver {
        self.orchestrator.subscribe(partition_key)
    }

    pub async fn documents(&self, partition_key: &str) -> Vec<Document> {
        let filter = SearchFilter {
            partition_key: Some(partition_key.to_string()),
            ..Default::default()
        };
        self.store
            .list_documents(&filter)
            .await
            .expect("Failed to list documents")
    }
}

pub fn fast_settings() -> EmbeddingSettings {
    EmbeddingSettings {
        batch_size: 1,
        batch_delay: Duration::ZERO,
        retry_backoff: Duration::ZERO,
        ..Default::default()
    }
}

/// Everything queued on the receiver right now.
pub fn drain(rx: &mut JobEventReceiver) -> Vec<JobEvent> {
    std::iter::from_fn(|| rx.try_recv()).collect()
}
