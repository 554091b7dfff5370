//! Source catalogs: where sync targets and their document content come from.
//!
//! A catalog discovers [`SyncTarget`]s for a partition and turns each one
//! into [`DocumentDraft`]s. [`PartitionCatalog`] routes a partition key to
//! the catalogs configured for it.

pub mod entities;
pub mod files;
pub mod partition;
pub mod schema;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::{Job, SyncOptions, TargetType};
use crate::store::DocumentDraft;

pub use entities::{EntityCatalog, EntityDefinitions};
pub use files::DirectoryCatalog;
pub use partition::PartitionCatalog;
pub use schema::SqliteSchemaCatalog;

/// Errors raised while discovering or loading source content.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid source definition: {0}")]
    Parse(String),

    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CatalogError {
    fn from(e: tokio::task::JoinError) -> Self {
        CatalogError::Task(e.to_string())
    }
}

/// Kind of unit a catalog discovers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Table,
    Column,
    Entity,
    Metric,
    Template,
    Faq,
    File,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Table => "table",
            TargetKind::Column => "column",
            TargetKind::Entity => "entity",
            TargetKind::Metric => "metric",
            TargetKind::Template => "template",
            TargetKind::Faq => "faq",
            TargetKind::File => "file",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work discovered in phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncTarget {
    /// Name of the catalog that discovered (and will load) this target.
    pub source: String,
    pub kind: TargetKind,
    /// Container inside the source, e.g. the SQLite schema of a table.
    pub namespace: Option<String>,
    pub id: String,
}

impl SyncTarget {
    pub fn new(source: impl Into<String>, kind: TargetKind, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
            namespace: None,
            id: id.into(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// `main` (and no namespace) is left out of qualified names.
    pub fn qualified_id(&self) -> String {
        match self.namespace.as_deref() {
            None | Some("main") => self.id.clone(),
            Some(ns) => format!("{}.{}", ns, self.id),
        }
    }

    /// Stable key recorded on every document built from this target.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.qualified_id())
    }
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// What phase 1 should discover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncScope {
    pub target_type: Option<TargetType>,
    pub target_id: Option<String>,
    /// SQLite schemas to introspect; empty means `main`.
    pub schemas: Vec<String>,
    /// Table allow-list; empty means every table.
    pub tables: Vec<String>,
}

impl SyncScope {
    /// Everything a partition has to offer.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_job(job: &Job, options: &SyncOptions) -> Self {
        Self {
            target_type: job.target_type,
            target_id: job.target_id.clone(),
            schemas: options.schemas.clone(),
            tables: options.tables.clone(),
        }
    }

    /// Whether targets of `target_type` are in scope at all.
    pub fn includes(&self, target_type: TargetType) -> bool {
        self.target_type.map_or(true, |t| t == target_type)
    }

    /// Whether a target with `id` passes the `target_id` filter.
    pub fn matches_id(&self, id: &str) -> bool {
        self.target_id.as_deref().map_or(true, |wanted| wanted == id)
    }
}

/// A source of sync targets and document content.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Unique name; stored on every target this catalog discovers.
    fn name(&self) -> &str;

    /// Partition keys this catalog serves. Empty for single-partition sources.
    fn partitions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lists the targets of `partition_key` that fall within `scope`.
    async fn discover(
        &self,
        partition_key: &str,
        scope: &SyncScope,
    ) -> Result<Vec<SyncTarget>, CatalogError>;

    /// Builds the documents for one target.
    async fn load(
        &self,
        partition_key: &str,
        target: &SyncTarget,
    ) -> Result<Vec<DocumentDraft>, CatalogError>;
}
