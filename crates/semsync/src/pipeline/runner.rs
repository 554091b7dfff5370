use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::catalog::{SourceCatalog, SyncTarget, TargetKind};
use crate::embedding::EmbeddingService;
use crate::jobs::{JobResults, JobType, TargetType};
use crate::store::{
    DocumentKey, ResourceType, SearchFilter, UpsertOutcome, VectorStore,
};

use super::context::{PendingEmbedding, SyncContext, WorkItem};
use super::error::PipelineError;
use super::progress::ProgressReporter;

pub const PHASE_DISCOVER: &str = "discover targets";
pub const PHASE_BUILD: &str = "build documents";
pub const PHASE_EMBED: &str = "embed documents";
pub const PHASE_INDEX: &str = "upsert vector index";
pub const PHASE_AGGREGATE: &str = "aggregate results";

/// How a pipeline run ended.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(JobResults),
    /// Stopped at a checkpoint; work written so far is kept.
    Cancelled(JobResults),
    Failed {
        error: PipelineError,
        results: JobResults,
    },
}

enum Flow {
    Continue,
    Cancelled,
}

/// The five sync phases: discover, build, embed, index, aggregate.
pub struct SyncPipeline {
    catalog: Arc<dyn SourceCatalog>,
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingService,
    default_batch_size: usize,
}

impl SyncPipeline {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        store: Arc<dyn VectorStore>,
        embedder: EmbeddingService,
    ) -> Self {
        let default_batch_size = embedder.settings().batch_size;
        Self {
            catalog,
            store,
            embedder,
            default_batch_size,
        }
    }

    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    pub fn catalog(&self) -> &Arc<dyn SourceCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &EmbeddingService {
        &self.embedder
    }

    /// Runs every phase for one job.
    /// Returns the outcome together with the final context.
    pub async fn run(
        &self,
        mut ctx: SyncContext,
        progress: &dyn ProgressReporter,
    ) -> (SyncOutcome, SyncContext) {
        let span = info_span!("sync_job",
            job_id = %ctx.job.id,
            partition_key = ctx.job.bus_key(),
            job_type = %ctx.job.job_type,
        );

        let flow = self.run_phases(&mut ctx, progress).instrument(span).await;
        let results = ctx.results.clone();
        let outcome = match flow {
            Ok(Flow::Continue) => SyncOutcome::Completed(results),
            Ok(Flow::Cancelled) => SyncOutcome::Cancelled(results),
            Err(error) => SyncOutcome::Failed { error, results },
        };
        (outcome, ctx)
    }

    async fn run_phases(
        &self,
        ctx: &mut SyncContext,
        progress: &dyn ProgressReporter,
    ) -> Result<Flow, PipelineError> {
        // Phase 1: discover
        if progress.cancel_requested() {
            return Ok(Flow::Cancelled);
        }
        self.phase_discover(ctx)
            .instrument(info_span!("discover_targets"))
            .await?;

        // Phase 2: build
        if progress.cancel_requested() {
            return Ok(Flow::Cancelled);
        }
        self.phase_build(ctx, progress)
            .instrument(info_span!("build_documents"))
            .await?;

        // Phase 3: embed
        if progress.cancel_requested() {
            return Ok(Flow::Cancelled);
        }
        if let Flow::Cancelled = self
            .phase_embed(ctx, progress)
            .instrument(info_span!("embed_documents"))
            .await?
        {
            return Ok(Flow::Cancelled);
        }

        // Phase 4: index
        if progress.cancel_requested() {
            return Ok(Flow::Cancelled);
        }
        self.phase_index(ctx, progress)
            .instrument(info_span!("upsert_vector_index"))
            .await?;

        // Phase 5: aggregate
        if progress.cancel_requested() {
            return Ok(Flow::Cancelled);
        }
        progress.checkpoint(ctx.progress.current(), PHASE_AGGREGATE)?;
        info!(
            built = ctx.results.documents_built,
            unchanged = ctx.results.documents_unchanged,
            embedded = ctx.results.documents_embedded,
            indexed = ctx.results.documents_indexed,
            pruned = ctx.results.documents_pruned,
            errors = ctx.results.errors.len(),
            "Sync finished"
        );
        Ok(Flow::Continue)
    }

    async fn phase_discover(&self, ctx: &mut SyncContext) -> Result<(), PipelineError> {
        if ctx.job.job_type == JobType::BulkRegenerate {
            let filter = SearchFilter {
                partition_key: ctx.job.partition_key.clone(),
                ..Default::default()
            };
            let wanted = resource_types_for(ctx.scope.target_type);
            let documents = self
                .store
                .list_documents(&filter)
                .await
                .map_err(|e| PipelineError::phase(PHASE_DISCOVER, e))?;

            ctx.items = documents
                .into_iter()
                .filter(|d| wanted.map_or(true, |w| w.contains(&d.key.resource_type)))
                .filter(|d| ctx.scope.matches_id(&d.key.resource_id))
                .map(WorkItem::Stored)
                .collect();
        } else {
            ctx.partitions = match ctx.job.partition_key {
                Some(ref key) => vec![key.clone()],
                None => self.catalog.partitions(),
            };
            for partition_key in &ctx.partitions {
                let targets = self
                    .catalog
                    .discover(partition_key, &ctx.scope)
                    .await
                    .map_err(|e| PipelineError::phase(PHASE_DISCOVER, e))?;
                ctx.items
                    .extend(targets.into_iter().map(|target| WorkItem::Source {
                        partition_key: partition_key.clone(),
                        target,
                    }));
            }
        }

        if ctx.items.is_empty() {
            if let Some(ref target_id) = ctx.scope.target_id {
                let kind = ctx.scope.target_type.map_or("target", |t| t.as_str());
                return Err(PipelineError::phase(
                    PHASE_DISCOVER,
                    format!("{} '{}' not found", kind, target_id),
                ));
            }
        }

        ctx.progress.set_total(ctx.items.len());
        debug!(targets = ctx.items.len(), "Discovery complete");
        Ok(())
    }

    async fn phase_build(
        &self,
        ctx: &mut SyncContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        progress.checkpoint(ctx.progress.current(), PHASE_BUILD)?;
        let force = ctx.options.force_refresh;

        let items = std::mem::take(&mut ctx.items);
        for item in &items {
            match item {
                WorkItem::Source {
                    partition_key,
                    target,
                } => {
                    self.build_target(ctx, partition_key, target, force).await?;
                }
                WorkItem::Stored(doc) => {
                    count_resource(&mut ctx.results, doc.key.resource_type);
                    ctx.seen.insert(doc.key.clone());
                    ctx.pending.push(PendingEmbedding {
                        key: doc.key.clone(),
                        text: doc.embedding_text(),
                    });
                }
            }
            let value = ctx.progress.advance(1);
            progress.checkpoint(value, PHASE_BUILD)?;
        }
        ctx.items = items;
        Ok(())
    }

    async fn build_target(
        &self,
        ctx: &mut SyncContext,
        partition_key: &str,
        target: &SyncTarget,
        force: bool,
    ) -> Result<(), PipelineError> {
        let drafts = match self.catalog.load(partition_key, target).await {
            Ok(drafts) => drafts,
            Err(e) => {
                let err = PipelineError::Target {
                    target: format!("{}/{}", partition_key, target),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Skipping target");
                ctx.record_error(err.to_string());
                ctx.failed_targets
                    .insert((partition_key.to_string(), target.key()));
                return Ok(());
            }
        };

        count_target(&mut ctx.results, target.kind);
        let source_target = target.key();
        for draft in &drafts {
            let outcome = self
                .store
                .upsert_document(partition_key, &source_target, draft, force)
                .await?;
            let key = DocumentKey::new(partition_key, draft.resource_type, &draft.resource_id);
            if draft.resource_type == ResourceType::ColumnDoc {
                ctx.results.columns_synced += 1;
            }
            match outcome {
                UpsertOutcome::Unchanged => {
                    ctx.results.documents_unchanged += 1;
                    ctx.unchanged.push(key.clone());
                }
                _ => {
                    ctx.results.documents_built += 1;
                    ctx.pending.push(PendingEmbedding {
                        key: key.clone(),
                        text: draft.embedding_text(),
                    });
                }
            }
            ctx.seen.insert(key);
        }
        Ok(())
    }

    async fn phase_embed(
        &self,
        ctx: &mut SyncContext,
        progress: &dyn ProgressReporter,
    ) -> Result<Flow, PipelineError> {
        progress.checkpoint(ctx.progress.current(), PHASE_EMBED)?;

        let (pending, blank): (Vec<_>, Vec<_>) = std::mem::take(&mut ctx.pending)
            .into_iter()
            .partition(|p| !p.text.trim().is_empty());
        for doc in &blank {
            ctx.record_error(format!("Document {} has no text to embed", doc.key));
        }
        if pending.is_empty() {
            return Ok(Flow::Continue);
        }

        let batch_size = ctx
            .options
            .batch_size
            .unwrap_or(self.default_batch_size)
            .max(1);
        let batch_count = pending.len().div_ceil(batch_size);
        let model = self.embedder.model_name().to_string();

        for (i, batch) in pending.chunks(batch_size).enumerate() {
            if i > 0 {
                if progress.cancel_requested() {
                    debug!(batch = i + 1, batch_count, "Cancelled between embedding batches");
                    return Ok(Flow::Cancelled);
                }
                self.embedder.pace().await;
            }

            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await.map_err(|e| {
                PipelineError::phase(
                    PHASE_EMBED,
                    format!("batch {} of {}: {}", i + 1, batch_count, e),
                )
            })?;

            for (doc, vector) in batch.iter().zip(vectors.iter()) {
                if self.store.set_embedding(&doc.key, vector, &model).await? {
                    ctx.results.documents_embedded += 1;
                    ctx.embedded.push(doc.key.clone());
                } else {
                    debug!(document = %doc.key, "Document vanished before its embedding was stored");
                }
            }

            let step = format!("{} (batch {} of {})", PHASE_EMBED, i + 1, batch_count);
            progress.checkpoint(ctx.progress.current(), &step)?;
        }
        Ok(Flow::Continue)
    }

    async fn phase_index(
        &self,
        ctx: &mut SyncContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        progress.checkpoint(ctx.progress.current(), PHASE_INDEX)?;

        for key in &ctx.embedded {
            if self.store.mark_indexed(key).await? {
                ctx.results.documents_indexed += 1;
            }
        }

        // Left embedded but unindexed by an earlier run that stopped short.
        for key in &ctx.unchanged {
            let needs_index = self
                .store
                .get_document(key)
                .await?
                .is_some_and(|doc| doc.indexed_at.is_none());
            if needs_index && self.store.mark_indexed(key).await? {
                ctx.results.documents_indexed += 1;
            }
        }

        if self.prunes(ctx) {
            for partition_key in &ctx.partitions {
                let protected: HashSet<String> = ctx
                    .failed_targets
                    .iter()
                    .filter(|(pk, _)| pk == partition_key)
                    .map(|(_, target)| target.clone())
                    .collect();
                let pruned = self
                    .store
                    .prune(partition_key, &ctx.seen, &protected)
                    .await
                    .map_err(|e| PipelineError::phase(PHASE_INDEX, e))?;
                if pruned > 0 {
                    info!(partition_key = %partition_key, pruned, "Pruned stale documents");
                }
                ctx.results.documents_pruned += pruned;
            }
        }
        Ok(())
    }

    /// Only an unrestricted full sync has seen everything a partition holds.
    fn prunes(&self, ctx: &SyncContext) -> bool {
        ctx.job.job_type == JobType::FullSync
            && ctx.scope.target_type.is_none()
            && ctx.scope.target_id.is_none()
            && ctx.scope.tables.is_empty()
            && ctx.scope.schemas.is_empty()
    }
}

fn count_target(results: &mut JobResults, kind: TargetKind) {
    match kind {
        TargetKind::Table => results.tables_synced += 1,
        TargetKind::Entity => results.entities_synced += 1,
        TargetKind::Metric => results.metrics_synced += 1,
        TargetKind::Template => results.templates_synced += 1,
        TargetKind::Faq | TargetKind::File => results.documents_synced += 1,
        // Column documents are counted per document.
        TargetKind::Column => {}
    }
}

fn count_resource(results: &mut JobResults, resource_type: ResourceType) {
    match resource_type {
        ResourceType::TableDoc => results.tables_synced += 1,
        ResourceType::ColumnDoc => results.columns_synced += 1,
        ResourceType::EntityDoc => results.entities_synced += 1,
        ResourceType::MetricDoc => results.metrics_synced += 1,
        ResourceType::TemplateDoc => results.templates_synced += 1,
        ResourceType::Faq | ResourceType::FileChunk => results.documents_synced += 1,
    }
}

/// Resource types a bulk regeneration touches for a target type.
fn resource_types_for(target_type: Option<TargetType>) -> Option<&'static [ResourceType]> {
    target_type.map(|t| -> &'static [ResourceType] {
        match t {
            TargetType::Table => &[ResourceType::TableDoc],
            TargetType::Column => &[ResourceType::ColumnDoc],
            TargetType::Entity => &[ResourceType::EntityDoc],
            TargetType::Metric => &[ResourceType::MetricDoc],
            TargetType::Template => &[ResourceType::TemplateDoc],
            TargetType::Document => &[ResourceType::Faq, ResourceType::FileChunk],
        }
    })
}
