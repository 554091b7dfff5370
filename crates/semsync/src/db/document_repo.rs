//! Document repository: content upserts, embeddings, and similarity search
//! over the `documents` table.
//!
//! Documents are keyed by (`partition_key`, `resource_type`, `resource_id`).
//! Embeddings are stored as little-endian `f32` BLOBs.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::embedding::{blob_to_vec, cosine_similarity};

/// A raw document row from the database.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub partition_key: String,
    pub resource_type: String,
    pub resource_id: String,
    pub source_target: String,
    pub title: String,
    pub content: String,
    pub metadata: String,
    pub tenant_id: Option<String>,
    pub content_hash: String,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub embedded_at: Option<String>,
    pub indexed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            partition_key: row.get("partition_key")?,
            resource_type: row.get("resource_type")?,
            resource_id: row.get("resource_id")?,
            source_target: row.get("source_target")?,
            title: row.get("title")?,
            content: row.get("content")?,
            metadata: row.get("metadata")?,
            tenant_id: row.get("tenant_id")?,
            content_hash: row.get("content_hash")?,
            embedding: row.get("embedding")?,
            embedding_model: row.get("embedding_model")?,
            embedded_at: row.get("embedded_at")?,
            indexed_at: row.get("indexed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Content columns written by [`upsert_content`].
#[derive(Debug, Clone)]
pub struct ContentRow<'a> {
    pub partition_key: &'a str,
    pub resource_type: &'a str,
    pub resource_id: &'a str,
    pub source_target: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub metadata: &'a str,
    pub tenant_id: Option<&'a str>,
    pub content_hash: &'a str,
}

/// What [`upsert_content`] did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; one was inserted without an embedding.
    Created,
    /// The content hash changed; the old embedding was discarded.
    Updated,
    /// Content is unchanged but the row needs (re-)embedding.
    Stale,
    /// Content is unchanged and already embedded.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the document must go through the embedding phase.
    pub fn needs_embedding(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Filter for [`list`] and [`search`].
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub partition_key: Option<String>,
    pub resource_type: Option<String>,
    pub tenant_id: Option<String>,
    pub source_target: Option<String>,
    /// Only rows that went through the index phase.
    pub indexed_only: bool,
}

impl DocumentFilter {
    fn where_clause(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref partition_key) = self.partition_key {
            conditions.push(format!("partition_key = ?{}", param_values.len() + 1));
            param_values.push(Box::new(partition_key.clone()));
        }
        if let Some(ref resource_type) = self.resource_type {
            conditions.push(format!("resource_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(resource_type.clone()));
        }
        if let Some(ref tenant_id) = self.tenant_id {
            conditions.push(format!("tenant_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(tenant_id.clone()));
        }
        if let Some(ref source_target) = self.source_target {
            conditions.push(format!("source_target = ?{}", param_values.len() + 1));
            param_values.push(Box::new(source_target.clone()));
        }
        if self.indexed_only {
            conditions.push("indexed_at IS NOT NULL AND embedding IS NOT NULL".to_string());
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, param_values)
    }
}

/// Inserts or refreshes a document's content.
///
/// When the stored hash differs from `row.content_hash` the embedding and
/// index timestamps are cleared. With `force` set an unchanged, embedded
/// document is reported as [`UpsertOutcome::Stale`] so it gets re-embedded;
/// its old vector stays searchable until replaced.
pub fn upsert_content(
    db: &Database,
    row: &ContentRow<'_>,
    force: bool,
    now: &str,
) -> Result<UpsertOutcome, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;

        let existing: Option<(String, String, bool)> = tx
            .query_row(
                "SELECT id, content_hash, embedding IS NOT NULL FROM documents
                 WHERE partition_key = ?1 AND resource_type = ?2 AND resource_id = ?3",
                params![row.partition_key, row.resource_type, row.resource_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO documents (id, partition_key, resource_type, resource_id,
                     source_target, title, content, metadata, tenant_id, content_hash,
                     created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        row.partition_key,
                        row.resource_type,
                        row.resource_id,
                        row.source_target,
                        row.title,
                        row.content,
                        row.metadata,
                        row.tenant_id,
                        row.content_hash,
                        now,
                    ],
                )?;
                UpsertOutcome::Created
            }
            Some((id, hash, _)) if hash != row.content_hash => {
                tx.execute(
                    "UPDATE documents SET source_target = ?2, title = ?3, content = ?4,
                     metadata = ?5, tenant_id = ?6, content_hash = ?7, embedding = NULL,
                     embedding_model = NULL, embedded_at = NULL, indexed_at = NULL,
                     updated_at = ?8
                     WHERE id = ?1",
                    params![
                        id,
                        row.source_target,
                        row.title,
                        row.content,
                        row.metadata,
                        row.tenant_id,
                        row.content_hash,
                        now,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            Some((id, _, has_embedding)) => {
                // Same content; metadata may still have moved.
                tx.execute(
                    "UPDATE documents SET source_target = ?2, title = ?3, metadata = ?4,
                     tenant_id = ?5
                     WHERE id = ?1",
                    params![
                        id,
                        row.source_target,
                        row.title,
                        row.metadata,
                        row.tenant_id,
                    ],
                )?;
                if has_embedding && !force {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Stale
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    })
}

/// Finds a document by its natural key.
pub fn find(
    db: &Database,
    partition_key: &str,
    resource_type: &str,
    resource_id: &str,
) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM documents
                 WHERE partition_key = ?1 AND resource_type = ?2 AND resource_id = ?3",
                params![partition_key, resource_type, resource_id],
                DocumentRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Stores an embedding for a document. Returns `false` if the row is gone.
pub fn set_embedding(
    db: &Database,
    partition_key: &str,
    resource_type: &str,
    resource_id: &str,
    embedding: &[u8],
    model: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents SET embedding = ?4, embedding_model = ?5, embedded_at = ?6,
             updated_at = ?6
             WHERE partition_key = ?1 AND resource_type = ?2 AND resource_id = ?3",
            params![
                partition_key,
                resource_type,
                resource_id,
                embedding,
                model,
                now
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Marks an embedded document as indexed. Rows without an embedding are
/// left untouched and `false` is returned.
pub fn mark_indexed(
    db: &Database,
    partition_key: &str,
    resource_type: &str,
    resource_id: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents SET indexed_at = ?4
             WHERE partition_key = ?1 AND resource_type = ?2 AND resource_id = ?3
             AND embedding IS NOT NULL",
            params![partition_key, resource_type, resource_id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Lists documents matching the filter, ordered by natural key.
pub fn list(db: &Database, filter: &DocumentFilter) -> Result<Vec<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let (where_clause, param_values) = filter.where_clause();
        let sql = format!(
            "SELECT * FROM documents {} ORDER BY partition_key, resource_type, resource_id",
            where_clause
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), DocumentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists documents in a partition that still lack an embedding.
pub fn pending(db: &Database, partition_key: &str) -> Result<Vec<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM documents WHERE partition_key = ?1 AND embedding IS NULL
             ORDER BY resource_type, resource_id",
        )?;
        let rows = stmt
            .query_map(params![partition_key], DocumentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts documents in a partition.
pub fn count(db: &Database, partition_key: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE partition_key = ?1",
            params![partition_key],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Deletes documents of a partition whose (`resource_type`, `resource_id`)
/// is not in `keep`. Documents whose `source_target` is listed in
/// `protected_targets` survive regardless. Returns the number deleted.
pub fn delete_missing(
    db: &Database,
    partition_key: &str,
    keep: &HashSet<(String, String)>,
    protected_targets: &HashSet<String>,
) -> Result<u64, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;

        let doomed: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id, resource_type, resource_id, source_target FROM documents
                 WHERE partition_key = ?1",
            )?;
            let rows = stmt
                .query_map(params![partition_key], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .filter(|(_, rtype, rid, target)| {
                    !protected_targets.contains(target)
                        && !keep.contains(&(rtype.clone(), rid.clone()))
                })
                .map(|(id, ..)| id)
                .collect()
        };

        for id in &doomed {
            tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        if !doomed.is_empty() {
            log::info!(
                "Pruned {} stale document(s) from partition {}",
                doomed.len(),
                partition_key
            );
        }
        Ok(doomed.len() as u64)
    })
}

/// Brute-force cosine search over embedded documents matching the filter.
/// Returns up to `limit` rows with their similarity, best first.
pub fn search(
    db: &Database,
    filter: &DocumentFilter,
    query: &[f32],
    limit: usize,
) -> Result<Vec<(DocumentRow, f32)>, DatabaseError> {
    let candidates = list(db, filter)?;

    let mut scored: Vec<(DocumentRow, f32)> = candidates
        .into_iter()
        .filter_map(|row| {
            let score = row
                .embedding
                .as_deref()
                .map(|blob| cosine_similarity(query, &blob_to_vec(blob)))?;
            Some((row, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}
