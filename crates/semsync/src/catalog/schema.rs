//! Schema introspection of a SQLite database.
//!
//! A table target yields one `table_doc` plus one `column_doc` per column.
//! Introspection runs on the blocking pool with a read-only connection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::json;

use super::{CatalogError, SourceCatalog, SyncScope, SyncTarget, TargetKind};
use crate::jobs::TargetType;
use crate::store::{DocumentDraft, ResourceType};

const DEFAULT_SCHEMA: &str = "main";

#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    data_type: String,
    not_null: bool,
    default_value: Option<String>,
    primary_key: bool,
    references: Option<String>,
}

/// Introspects tables and columns of one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteSchemaCatalog {
    name: String,
    path: PathBuf,
    tenant_id: Option<String>,
}

impl SqliteSchemaCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "schema".to_string(),
            path: path.into(),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn open_read_only(path: &Path) -> Result<Connection, CatalogError> {
    if !path.exists() {
        return Err(CatalogError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "database file not found"),
        });
    }
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

fn schema_exists(conn: &Connection, schema: &str) -> Result<bool, CatalogError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_database_list WHERE name = ?1",
        params![schema],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn list_tables(conn: &Connection, schema: &str) -> Result<Vec<String>, CatalogError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM pragma_table_list
         WHERE schema = ?1 AND type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map(params![schema], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn read_columns(
    conn: &Connection,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>, CatalogError> {
    let mut fk_stmt =
        conn.prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1, ?2)")?;
    let foreign_keys = fk_stmt
        .query_map(params![table, schema], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2)
         ORDER BY cid",
    )?;
    let columns = stmt
        .query_map(params![table, schema], |r| {
            Ok(ColumnInfo {
                name: r.get(0)?,
                data_type: r.get(1)?,
                not_null: r.get::<_, i64>(2)? != 0,
                default_value: r.get(3)?,
                primary_key: r.get::<_, i64>(4)? != 0,
                references: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns
        .into_iter()
        .map(|mut col| {
            col.references = foreign_keys
                .iter()
                .find(|(from, _, _)| *from == col.name)
                .map(|(_, parent, to)| match to {
                    Some(to) => format!("{}({})", parent, to),
                    None => parent.clone(),
                });
            col
        })
        .collect())
}

fn qualify(schema: &str, name: &str) -> String {
    if schema == DEFAULT_SCHEMA {
        name.to_string()
    } else {
        format!("{}.{}", schema, name)
    }
}

fn describe_column(col: &ColumnInfo) -> String {
    let mut parts = vec![if col.data_type.is_empty() {
        "untyped".to_string()
    } else {
        col.data_type.clone()
    }];
    if col.primary_key {
        parts.push("primary key".to_string());
    }
    if col.not_null {
        parts.push("not null".to_string());
    }
    if let Some(ref default) = col.default_value {
        parts.push(format!("default {}", default));
    }
    if let Some(ref references) = col.references {
        parts.push(format!("references {}", references));
    }
    parts.join(", ")
}

fn table_draft(schema: &str, table: &str, columns: &[ColumnInfo]) -> DocumentDraft {
    let qualified = qualify(schema, table);
    let mut content = format!(
        "Table {} in schema {} with {} column(s):",
        qualified,
        schema,
        columns.len()
    );
    for col in columns {
        content.push_str(&format!("\n- {}: {}", col.name, describe_column(col)));
    }

    DocumentDraft::new(ResourceType::TableDoc, &qualified, format!("Table {}", qualified), content)
        .with_metadata(json!({
            "schema": schema,
            "table": table,
            "columns": columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        }))
}

fn column_draft(schema: &str, table: &str, col: &ColumnInfo) -> DocumentDraft {
    let qualified_table = qualify(schema, table);
    let resource_id = format!("{}.{}", qualified_table, col.name);
    let content = format!(
        "Column {} of table {}: {}.",
        col.name,
        qualified_table,
        describe_column(col)
    );

    DocumentDraft::new(
        ResourceType::ColumnDoc,
        &resource_id,
        format!("Column {}", resource_id),
        content,
    )
    .with_metadata(json!({
        "schema": schema,
        "table": table,
        "column": col.name,
        "data_type": col.data_type,
        "nullable": !col.not_null,
        "primary_key": col.primary_key,
        "references": col.references,
    }))
}

fn discover_blocking(path: &Path, source: &str, scope: &SyncScope) -> Result<Vec<SyncTarget>, CatalogError> {
    let want_tables = scope.includes(TargetType::Table);
    let want_column = scope.target_type == Some(TargetType::Column);
    if !want_tables && !want_column {
        return Ok(Vec::new());
    }

    let conn = open_read_only(path)?;
    let schemas: Vec<String> = if scope.schemas.is_empty() {
        vec![DEFAULT_SCHEMA.to_string()]
    } else {
        scope.schemas.clone()
    };

    let mut targets = Vec::new();
    for schema in &schemas {
        if !schema_exists(&conn, schema)? {
            return Err(CatalogError::NotFound {
                kind: "Schema",
                id: schema.clone(),
            });
        }

        for table in list_tables(&conn, schema)? {
            let qualified = qualify(schema, &table);
            let allowed = scope.tables.is_empty()
                || scope.tables.iter().any(|t| *t == table || *t == qualified);
            if !allowed {
                continue;
            }

            if want_column {
                let Some(wanted) = scope.target_id.as_deref() else {
                    continue;
                };
                for col in read_columns(&conn, schema, &table)? {
                    let column_id = format!("{}.{}", table, col.name);
                    if wanted == column_id || wanted == format!("{}.{}", qualified, col.name) {
                        targets.push(
                            SyncTarget::new(source, TargetKind::Column, column_id)
                                .in_namespace(schema.as_str()),
                        );
                    }
                }
            } else if scope.matches_id(&table) || scope.matches_id(&qualified) {
                targets.push(SyncTarget::new(source, TargetKind::Table, table).in_namespace(schema.as_str()));
            }
        }
    }
    Ok(targets)
}

fn load_blocking(
    path: &Path,
    target: &SyncTarget,
    tenant_id: Option<String>,
) -> Result<Vec<DocumentDraft>, CatalogError> {
    let conn = open_read_only(path)?;
    let schema = target.namespace.as_deref().unwrap_or(DEFAULT_SCHEMA);

    let drafts = match target.kind {
        TargetKind::Table => {
            let columns = read_columns(&conn, schema, &target.id)?;
            if columns.is_empty() {
                return Err(CatalogError::NotFound {
                    kind: "Table",
                    id: target.qualified_id(),
                });
            }
            let mut drafts = vec![table_draft(schema, &target.id, &columns)];
            drafts.extend(columns.iter().map(|c| column_draft(schema, &target.id, c)));
            drafts
        }
        TargetKind::Column => {
            let (table, column) = target.id.split_once('.').ok_or_else(|| {
                CatalogError::Parse(format!("column target '{}' is not table.column", target.id))
            })?;
            let col = read_columns(&conn, schema, table)?
                .into_iter()
                .find(|c| c.name == column)
                .ok_or_else(|| CatalogError::NotFound {
                    kind: "Column",
                    id: target.qualified_id(),
                })?;
            vec![column_draft(schema, table, &col)]
        }
        other => {
            return Err(CatalogError::Parse(format!(
                "schema catalog cannot load {} targets",
                other
            )))
        }
    };

    Ok(drafts
        .into_iter()
        .map(|d| d.with_tenant(tenant_id.clone()))
        .collect())
}

#[async_trait]
impl SourceCatalog for SqliteSchemaCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(
        &self,
        _partition_key: &str,
        scope: &SyncScope,
    ) -> Result<Vec<SyncTarget>, CatalogError> {
        let path = self.path.clone();
        let source = self.name.clone();
        let scope = scope.clone();
        tokio::task::spawn_blocking(move || discover_blocking(&path, &source, &scope)).await?
    }

    async fn load(
        &self,
        _partition_key: &str,
        target: &SyncTarget,
    ) -> Result<Vec<DocumentDraft>, CatalogError> {
        let path = self.path.clone();
        let target = target.clone();
        let tenant_id = self.tenant_id.clone();
        tokio::task::spawn_blocking(move || load_blocking(&path, &target, tenant_id)).await?
    }
}
