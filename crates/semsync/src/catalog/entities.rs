//! Business definitions: entities, metrics, query templates, and FAQs.
//!
//! Definitions come from a JSON file that is re-read on every discovery, so
//! edits are picked up by the next sync without a restart.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{CatalogError, SourceCatalog, SyncScope, SyncTarget, TargetKind};
use crate::jobs::TargetType;
use crate::store::{DocumentDraft, ResourceType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinitions {
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
    #[serde(default)]
    pub templates: Vec<TemplateDef>,
    #[serde(default)]
    pub faqs: Vec<FaqDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Table the entity is stored in, if any.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqDef {
    pub id: String,
    pub question: String,
    pub answer: String,
}

impl EntityDefinitions {
    pub fn from_json(s: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(s).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    fn targets(&self, source: &str, scope: &SyncScope) -> Vec<SyncTarget> {
        let mut targets = Vec::new();
        let mut push = |kind: TargetKind, wanted: bool, ids: Vec<&str>| {
            if wanted {
                targets.extend(
                    ids.into_iter()
                        .filter(|id| scope.matches_id(id))
                        .map(|id| SyncTarget::new(source, kind, id)),
                );
            }
        };

        push(
            TargetKind::Entity,
            scope.includes(TargetType::Entity),
            self.entities.iter().map(|e| e.name.as_str()).collect(),
        );
        push(
            TargetKind::Metric,
            scope.includes(TargetType::Metric),
            self.metrics.iter().map(|m| m.name.as_str()).collect(),
        );
        push(
            TargetKind::Template,
            scope.includes(TargetType::Template),
            self.templates.iter().map(|t| t.name.as_str()).collect(),
        );
        // FAQs have no target type of their own; only a full scope picks them up.
        push(
            TargetKind::Faq,
            scope.target_type.is_none(),
            self.faqs.iter().map(|f| f.id.as_str()).collect(),
        );
        targets
    }

    fn draft(&self, target: &SyncTarget) -> Option<DocumentDraft> {
        match target.kind {
            TargetKind::Entity => self.entities.iter().find(|e| e.name == target.id).map(entity_draft),
            TargetKind::Metric => self.metrics.iter().find(|m| m.name == target.id).map(metric_draft),
            TargetKind::Template => self
                .templates
                .iter()
                .find(|t| t.name == target.id)
                .map(template_draft),
            TargetKind::Faq => self.faqs.iter().find(|f| f.id == target.id).map(faq_draft),
            _ => None,
        }
    }
}

fn entity_draft(e: &EntityDef) -> DocumentDraft {
    let mut content = format!("Entity {}.", e.name);
    if !e.description.is_empty() {
        content.push_str(&format!(" {}", e.description));
    }
    if let Some(ref table) = e.table {
        content.push_str(&format!("\nStored in table {}.", table));
    }
    if !e.attributes.is_empty() {
        content.push_str(&format!("\nAttributes: {}.", e.attributes.join(", ")));
    }
    if !e.synonyms.is_empty() {
        content.push_str(&format!("\nAlso known as: {}.", e.synonyms.join(", ")));
    }
    DocumentDraft::new(ResourceType::EntityDoc, &e.name, format!("Entity {}", e.name), content)
        .with_metadata(json!({
            "table": e.table,
            "attributes": e.attributes,
            "synonyms": e.synonyms,
        }))
}

fn metric_draft(m: &MetricDef) -> DocumentDraft {
    let mut content = format!("Metric {}.", m.name);
    if !m.description.is_empty() {
        content.push_str(&format!(" {}", m.description));
    }
    if let Some(ref expression) = m.expression {
        content.push_str(&format!("\nComputed as: {}", expression));
    }
    if let Some(ref entity) = m.entity {
        content.push_str(&format!("\nMeasured on entity {}.", entity));
    }
    DocumentDraft::new(ResourceType::MetricDoc, &m.name, format!("Metric {}", m.name), content)
        .with_metadata(json!({"expression": m.expression, "entity": m.entity}))
}

fn template_draft(t: &TemplateDef) -> DocumentDraft {
    let content = if t.description.is_empty() {
        t.sql.clone()
    } else {
        format!("{}\n{}", t.description, t.sql)
    };
    DocumentDraft::new(ResourceType::TemplateDoc, &t.name, format!("Template {}", t.name), content)
        .with_metadata(json!({"sql": t.sql}))
}

fn faq_draft(f: &FaqDef) -> DocumentDraft {
    DocumentDraft::new(ResourceType::Faq, &f.id, &f.question, &f.answer)
}

#[derive(Debug, Clone)]
enum DefinitionSource {
    File(PathBuf),
    Inline(EntityDefinitions),
}

/// Serves [`EntityDefinitions`] from a JSON file or from memory.
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    source: DefinitionSource,
    tenant_id: Option<String>,
}

impl EntityCatalog {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: DefinitionSource::File(path.into()),
            tenant_id: None,
        }
    }

    pub fn from_definitions(definitions: EntityDefinitions) -> Self {
        Self {
            source: DefinitionSource::Inline(definitions),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    async fn definitions(&self) -> Result<EntityDefinitions, CatalogError> {
        match &self.source {
            DefinitionSource::Inline(defs) => Ok(defs.clone()),
            DefinitionSource::File(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| CatalogError::Io {
                        path: path.clone(),
                        source,
                    })?;
                EntityDefinitions::from_json(&content)
            }
        }
    }
}

#[async_trait]
impl SourceCatalog for EntityCatalog {
    fn name(&self) -> &str {
        "entities"
    }

    async fn discover(
        &self,
        _partition_key: &str,
        scope: &SyncScope,
    ) -> Result<Vec<SyncTarget>, CatalogError> {
        let defs = self.definitions().await?;
        Ok(defs.targets(self.name(), scope))
    }

    async fn load(
        &self,
        _partition_key: &str,
        target: &SyncTarget,
    ) -> Result<Vec<DocumentDraft>, CatalogError> {
        let defs = self.definitions().await?;
        let draft = defs.draft(target).ok_or_else(|| CatalogError::NotFound {
            kind: "Definition",
            id: target.key(),
        })?;
        Ok(vec![draft.with_tenant(self.tenant_id.clone())])
    }
}
