//! Uploaded text files under a partition's documents directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use walkdir::WalkDir;

use super::{CatalogError, SourceCatalog, SyncScope, SyncTarget, TargetKind};
use crate::chunk::chunk_text;
use crate::jobs::TargetType;
use crate::store::{DocumentDraft, ResourceType};

/// File extensions picked up from the documents directory.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "csv", "sql"];

/// Chunks every supported file under `root` into `file_chunk` documents.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
    chunk_max_tokens: usize,
    tenant_id: Option<String>,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>, chunk_max_tokens: usize) -> Self {
        Self {
            root: root.into(),
            chunk_max_tokens,
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self) -> Vec<String> {
        if !self.root.is_dir() {
            log::debug!("Documents directory {} does not exist", self.root.display());
            return Vec::new();
        }

        let mut files: Vec<String> = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_supported(e.path()))
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_title(rel_path: &str) -> String {
    Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_else(|| rel_path.to_string())
}

#[async_trait]
impl SourceCatalog for DirectoryCatalog {
    fn name(&self) -> &str {
        "files"
    }

    async fn discover(
        &self,
        _partition_key: &str,
        scope: &SyncScope,
    ) -> Result<Vec<SyncTarget>, CatalogError> {
        if !scope.includes(TargetType::Document) {
            return Ok(Vec::new());
        }
        let this = self.clone();
        let files = tokio::task::spawn_blocking(move || this.scan()).await?;

        Ok(files
            .into_iter()
            .filter(|f| scope.matches_id(f))
            .map(|f| SyncTarget::new(self.name(), TargetKind::File, f))
            .collect())
    }

    async fn load(
        &self,
        _partition_key: &str,
        target: &SyncTarget,
    ) -> Result<Vec<DocumentDraft>, CatalogError> {
        let path = self.root.join(&target.id);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;

        let chunks = chunk_text(&text, self.chunk_max_tokens);
        let chunk_count = chunks.len();
        let title = file_title(&target.id);

        Ok(chunks
            .into_iter()
            .map(|chunk| {
                DocumentDraft::new(
                    ResourceType::FileChunk,
                    format!("{}#{}", target.id, chunk.index),
                    title.clone(),
                    chunk.text,
                )
                .with_metadata(json!({
                    "path": target.id,
                    "chunk_index": chunk.index,
                    "chunk_count": chunk_count,
                }))
                .with_tenant(self.tenant_id.clone())
            })
            .collect())
    }
}
