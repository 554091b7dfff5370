//! Routes partition keys to the catalogs configured for them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    CatalogError, DirectoryCatalog, EntityCatalog, SourceCatalog, SqliteSchemaCatalog, SyncScope,
    SyncTarget,
};
use crate::config::Config;
use crate::store::DocumentDraft;

/// Merges the sources of each partition behind one [`SourceCatalog`].
#[derive(Default, Clone)]
pub struct PartitionCatalog {
    partitions: BTreeMap<String, Vec<Arc<dyn SourceCatalog>>>,
}

impl PartitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source to `partition_key`, creating the partition if needed.
    pub fn with_source(mut self, partition_key: &str, source: Arc<dyn SourceCatalog>) -> Self {
        self.add_source(partition_key, source);
        self
    }

    pub fn add_source(&mut self, partition_key: &str, source: Arc<dyn SourceCatalog>) {
        self.partitions
            .entry(partition_key.to_string())
            .or_default()
            .push(source);
    }

    /// One schema, files, and entities source per configured partition,
    /// for whichever of the three the partition sets.
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::new();
        for (key, partition) in &config.partitions {
            let tenant = partition.tenant_id.clone();
            if let Some(ref path) = partition.schema_database {
                catalog.add_source(
                    key,
                    Arc::new(SqliteSchemaCatalog::new(path).with_tenant(tenant.clone())),
                );
            }
            if let Some(ref dir) = partition.documents_dir {
                catalog.add_source(
                    key,
                    Arc::new(
                        DirectoryCatalog::new(dir, partition.chunk_max_tokens)
                            .with_tenant(tenant.clone()),
                    ),
                );
            }
            if let Some(ref path) = partition.entities_file {
                catalog.add_source(
                    key,
                    Arc::new(EntityCatalog::from_file(path).with_tenant(tenant.clone())),
                );
            }
            // A partition with no sources still exists, it just discovers nothing.
            catalog.partitions.entry(key.clone()).or_default();
        }
        catalog
    }

    fn sources(&self, partition_key: &str) -> Result<&[Arc<dyn SourceCatalog>], CatalogError> {
        self.partitions
            .get(partition_key)
            .map(Vec::as_slice)
            .ok_or_else(|| CatalogError::UnknownPartition(partition_key.to_string()))
    }
}

impl std::fmt::Debug for PartitionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, sources) in &self.partitions {
            map.entry(key, &sources.iter().map(|s| s.name()).collect::<Vec<_>>());
        }
        map.finish()
    }
}

#[async_trait]
impl SourceCatalog for PartitionCatalog {
    fn name(&self) -> &str {
        "partitions"
    }

    fn partitions(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    async fn discover(
        &self,
        partition_key: &str,
        scope: &SyncScope,
    ) -> Result<Vec<SyncTarget>, CatalogError> {
        let mut targets = Vec::new();
        for source in self.sources(partition_key)? {
            let found = source.discover(partition_key, scope).await?;
            tracing::debug!(
                partition_key,
                source = source.name(),
                count = found.len(),
                "Discovered targets"
            );
            targets.extend(found);
        }
        Ok(targets)
    }

    async fn load(
        &self,
        partition_key: &str,
        target: &SyncTarget,
    ) -> Result<Vec<DocumentDraft>, CatalogError> {
        let source = self
            .sources(partition_key)?
            .iter()
            .find(|s| s.name() == target.source)
            .ok_or_else(|| CatalogError::NotFound {
                kind: "Source",
                id: target.source.clone(),
            })?;
        source.load(partition_key, target).await
    }
}
