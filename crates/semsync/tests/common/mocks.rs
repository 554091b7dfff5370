//! Scripted stand-ins for the embedding backend and the source catalog.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use semsync::catalog::{CatalogError, SourceCatalog, SyncScope, SyncTarget, TargetKind};
use semsync::embedding::{EmbeddingError, EmbeddingProvider};
use semsync::jobs::TargetType;
use semsync::store::{DocumentDraft, ResourceType};

pub const MOCK_DIMS: usize = 4;

/// Pauses one provider call until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub reached: Notify,
    pub release: Notify,
}

/// Deterministic embedding backend.
///
/// Calls are numbered from zero, retries included. Calls listed in
/// `failing` return a provider error; the call at the gate index waits
/// for [`Gate::release`] before answering.
pub struct MockProvider {
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
    failing: HashSet<usize>,
    delay: Duration,
    gate: Option<(usize, Arc<Gate>)>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    pub fn failing_calls(mut self, calls: &[usize]) -> Self {
        self.failing = calls.iter().copied().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn gated_at(mut self, call: usize) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        self.gate = Some((call, Arc::clone(&gate)));
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text received, in call order.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        let sum: u32 = bytes.iter().map(|b| *b as u32).sum();
        vec![
            bytes.len() as f32,
            (sum % 97) as f32,
            bytes.first().copied().unwrap_or(0) as f32,
            1.0,
        ]
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dims(&self) -> usize {
        MOCK_DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().extend(texts.iter().cloned());

        if let Some((at, ref gate)) = self.gate {
            if at == call {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&call) {
            return Err(EmbeddingError::Provider(format!("call {} rejected", call)));
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

/// In-memory catalog of tables per partition. Content can be edited
/// between jobs.
#[derive(Default)]
pub struct StaticCatalog {
    tables: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    broken: Mutex<HashSet<String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, partition_key: &str, table: &str, description: &str) -> Self {
        self.set_table(partition_key, table, description);
        self
    }

    pub fn set_table(&self, partition_key: &str, table: &str, description: &str) {
        self.tables
            .lock()
            .unwrap()
            .entry(partition_key.to_string())
            .or_default()
            .insert(table.to_string(), description.to_string());
    }

    pub fn remove_table(&self, partition_key: &str, table: &str) {
        if let Some(tables) = self.tables.lock().unwrap().get_mut(partition_key) {
            tables.remove(table);
        }
    }

    /// Makes `load` fail for `table` while it stays discoverable.
    pub fn break_table(&self, table: &str) {
        self.broken.lock().unwrap().insert(table.to_string());
    }

    pub fn repair_table(&self, table: &str) {
        self.broken.lock().unwrap().remove(table);
    }
}

#[async_trait]
impl SourceCatalog for StaticCatalog {
    fn name(&self) -> &str {
        "static"
    }

    fn partitions(&self) -> Vec<String> {
        self.tables.lock().unwrap().keys().cloned().collect()
    }

    async fn discover(
        &self,
        partition_key: &str,
        scope: &SyncScope,
    ) -> Result<Vec<SyncTarget>, CatalogError> {
        let tables = self.tables.lock().unwrap();
        let Some(partition) = tables.get(partition_key) else {
            return Err(CatalogError::UnknownPartition(partition_key.to_string()));
        };
        if !scope.includes(TargetType::Table) {
            return Ok(Vec::new());
        }
        Ok(partition
            .keys()
            .filter(|name| scope.tables.is_empty() || scope.tables.contains(name))
            .filter(|name| scope.matches_id(name))
            .map(|name| SyncTarget::new(self.name(), TargetKind::Table, name.clone()))
            .collect())
    }

    async fn load(
        &self,
        partition_key: &str,
        target: &SyncTarget,
    ) -> Result<Vec<DocumentDraft>, CatalogError> {
        if self.broken.lock().unwrap().contains(&target.id) {
            return Err(CatalogError::Io {
                path: target.id.clone().into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
            });
        }
        let tables = self.tables.lock().unwrap();
        let description = tables
            .get(partition_key)
            .and_then(|p| p.get(&target.id))
            .ok_or_else(|| CatalogError::NotFound {
                kind: "Table",
                id: target.id.clone(),
            })?;
        Ok(vec![DocumentDraft::new(
            ResourceType::TableDoc,
            target.id.clone(),
            format!("Table {}", target.id),
            description.clone(),
        )])
    }
}
