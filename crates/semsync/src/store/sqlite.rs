//! [`VectorStore`] over the local SQLite `documents` table.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    Document, DocumentDraft, DocumentKey, ResourceType, SearchFilter, SearchHit, UpsertOutcome,
    VectorStore,
};
use crate::db::document_repo::{self, ContentRow, DocumentFilter, DocumentRow};
use crate::db::{Database, DatabaseError};
use crate::embedding::{blob_to_vec, vec_to_blob};

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| log::warn!("Invalid document timestamp '{}': {}", s, e))
        .ok()
}

impl Document {
    /// Converts a row, skipping rows with an unknown resource type.
    fn from_row(row: DocumentRow) -> Option<Self> {
        let Some(resource_type) = ResourceType::parse(&row.resource_type) else {
            log::warn!(
                "Skipping document {} with unknown resource type '{}'",
                row.id,
                row.resource_type
            );
            return None;
        };
        let metadata = serde_json::from_str(&row.metadata).unwrap_or_else(|e| {
            log::warn!("Invalid metadata JSON for document {}: {}", row.id, e);
            Value::Object(Default::default())
        });

        Some(Self {
            id: row.id,
            key: DocumentKey {
                partition_key: row.partition_key,
                resource_type,
                resource_id: row.resource_id,
            },
            source_target: row.source_target,
            title: row.title,
            content: row.content,
            metadata,
            tenant_id: row.tenant_id,
            content_hash: row.content_hash,
            embedding: row.embedding.as_deref().map(blob_to_vec),
            embedding_model: row.embedding_model,
            embedded_at: row.embedded_at.as_deref().and_then(parse_timestamp),
            indexed_at: row.indexed_at.as_deref().and_then(parse_timestamp),
        })
    }
}

fn to_filter(filter: &SearchFilter, indexed_only: bool) -> DocumentFilter {
    DocumentFilter {
        partition_key: filter.partition_key.clone(),
        resource_type: filter.resource_type.map(|t| t.as_str().to_string()),
        tenant_id: filter.tenant_id.clone(),
        source_target: None,
        indexed_only,
    }
}

/// Document store on the shared [`Database`] handle.
#[derive(Clone)]
pub struct SqliteVectorStore {
    db: Database,
}

impl SqliteVectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Runs `f` on the blocking pool so rusqlite never stalls a runtime
    /// worker.
    async fn blocking<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_document(
        &self,
        partition_key: &str,
        source_target: &str,
        draft: &DocumentDraft,
        force: bool,
    ) -> Result<UpsertOutcome, DatabaseError> {
        let metadata =
            serde_json::to_string(&draft.metadata).map_err(|e| DatabaseError::Serialization {
                column: "metadata",
                source: e,
            })?;
        let hash = draft.content_hash();
        let partition_key = partition_key.to_string();
        let source_target = source_target.to_string();
        let draft = draft.clone();

        self.blocking(move |db| {
            let row = ContentRow {
                partition_key: &partition_key,
                resource_type: draft.resource_type.as_str(),
                resource_id: &draft.resource_id,
                source_target: &source_target,
                title: &draft.title,
                content: &draft.content,
                metadata: &metadata,
                tenant_id: draft.tenant_id.as_deref(),
                content_hash: &hash,
            };
            document_repo::upsert_content(db, &row, force, &now())
        })
        .await
    }

    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Document>, DatabaseError> {
        let key = key.clone();
        self.blocking(move |db| {
            let row = document_repo::find(
                db,
                &key.partition_key,
                key.resource_type.as_str(),
                &key.resource_id,
            )?;
            Ok(row.and_then(Document::from_row))
        })
        .await
    }

    async fn set_embedding(
        &self,
        key: &DocumentKey,
        embedding: &[f32],
        model: &str,
    ) -> Result<bool, DatabaseError> {
        let key = key.clone();
        let blob = vec_to_blob(embedding);
        let model = model.to_string();
        self.blocking(move |db| {
            document_repo::set_embedding(
                db,
                &key.partition_key,
                key.resource_type.as_str(),
                &key.resource_id,
                &blob,
                &model,
                &now(),
            )
        })
        .await
    }

    async fn mark_indexed(&self, key: &DocumentKey) -> Result<bool, DatabaseError> {
        let key = key.clone();
        self.blocking(move |db| {
            document_repo::mark_indexed(
                db,
                &key.partition_key,
                key.resource_type.as_str(),
                &key.resource_id,
                &now(),
            )
        })
        .await
    }

    async fn list_documents(&self, filter: &SearchFilter) -> Result<Vec<Document>, DatabaseError> {
        let filter = to_filter(filter, false);
        self.blocking(move |db| {
            let rows = document_repo::list(db, &filter)?;
            Ok(rows.into_iter().filter_map(Document::from_row).collect())
        })
        .await
    }

    async fn prune(
        &self,
        partition_key: &str,
        keep: &HashSet<DocumentKey>,
        protected_targets: &HashSet<String>,
    ) -> Result<u64, DatabaseError> {
        let keep: HashSet<(String, String)> = keep
            .iter()
            .filter(|k| k.partition_key == partition_key)
            .map(|k| (k.resource_type.as_str().to_string(), k.resource_id.clone()))
            .collect();
        let partition_key = partition_key.to_string();
        let protected_targets = protected_targets.clone();
        self.blocking(move |db| {
            document_repo::delete_missing(db, &partition_key, &keep, &protected_targets)
        })
        .await
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>, DatabaseError> {
        let filter = to_filter(filter, true);
        let query = query.to_vec();
        self.blocking(move |db| {
            let hits = document_repo::search(db, &filter, &query, limit)?;
            Ok(hits
                .into_iter()
                .filter_map(|(row, score)| {
                    Document::from_row(row).map(|document| SearchHit { document, score })
                })
                .collect())
        })
        .await
    }
}
