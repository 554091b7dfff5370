//! Vector store access: documents, embeddings, and similarity search.

pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::DatabaseError;

pub use crate::db::document_repo::UpsertOutcome;
pub use sqlite::SqliteVectorStore;

/// Kind of content a document was built from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    TableDoc,
    ColumnDoc,
    EntityDoc,
    MetricDoc,
    TemplateDoc,
    Faq,
    FileChunk,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::TableDoc => "table_doc",
            ResourceType::ColumnDoc => "column_doc",
            ResourceType::EntityDoc => "entity_doc",
            ResourceType::MetricDoc => "metric_doc",
            ResourceType::TemplateDoc => "template_doc",
            ResourceType::Faq => "faq",
            ResourceType::FileChunk => "file_chunk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table_doc" => Some(ResourceType::TableDoc),
            "column_doc" => Some(ResourceType::ColumnDoc),
            "entity_doc" => Some(ResourceType::EntityDoc),
            "metric_doc" => Some(ResourceType::MetricDoc),
            "template_doc" => Some(ResourceType::TemplateDoc),
            "faq" => Some(ResourceType::Faq),
            "file_chunk" => Some(ResourceType::FileChunk),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub partition_key: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl DocumentKey {
    pub fn new(
        partition_key: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            resource_type,
            resource_id: resource_id.into(),
        }
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.partition_key, self.resource_type, self.resource_id
        )
    }
}

/// Document content produced by a source catalog, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDraft {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub title: String,
    pub content: String,
    pub metadata: Value,
    pub tenant_id: Option<String>,
}

impl DocumentDraft {
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
            title: title.into(),
            content: content.into(),
            metadata: Value::Object(Default::default()),
            tenant_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// SHA-256 over title and content. Metadata does not affect it.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Text sent to the embedding provider.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.content)
    }
}

pub(crate) fn embedding_text(title: &str, content: &str) -> String {
    if title.trim().is_empty() {
        content.to_string()
    } else {
        format!("{}\n\n{}", title, content)
    }
}

/// A stored document.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub key: DocumentKey,
    /// Sync target the document was built from.
    pub source_target: String,
    pub title: String,
    pub content: String,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub content_hash: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.content)
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed_at.is_some() && self.embedding.is_some()
    }
}

/// Filter for listing and searching documents.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub partition_key: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub tenant_id: Option<String>,
}

/// A search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

/// Persistence for documents and their embeddings.
///
/// Upserts are keyed by [`DocumentKey`]. Implementations must keep already
/// written documents when a later call fails.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or refreshes a document's content; see [`UpsertOutcome`].
    async fn upsert_document(
        &self,
        partition_key: &str,
        source_target: &str,
        draft: &DocumentDraft,
        force: bool,
    ) -> Result<UpsertOutcome, DatabaseError>;

    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Document>, DatabaseError>;

    /// Stores the embedding for a document. Returns `false` if it is gone.
    async fn set_embedding(
        &self,
        key: &DocumentKey,
        embedding: &[f32],
        model: &str,
    ) -> Result<bool, DatabaseError>;

    /// Makes an embedded document visible to search.
    async fn mark_indexed(&self, key: &DocumentKey) -> Result<bool, DatabaseError>;

    async fn list_documents(&self, filter: &SearchFilter) -> Result<Vec<Document>, DatabaseError>;

    /// Deletes documents of `partition_key` not in `keep`, except those built
    /// from a target in `protected_targets`.
    async fn prune(
        &self,
        partition_key: &str,
        keep: &HashSet<DocumentKey>,
        protected_targets: &HashSet<String>,
    ) -> Result<u64, DatabaseError>;

    /// Nearest indexed documents by cosine similarity, best first.
    async fn search(
        &self,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>, DatabaseError>;
}
