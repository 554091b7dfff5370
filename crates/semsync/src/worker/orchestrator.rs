//! Job lifecycle: creation, claiming, execution, cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::{JobEvent, JobEventBus, JobEventReceiver, SubscriptionId};
use crate::catalog::PartitionCatalog;
use crate::config::Config;
use crate::db::Database;
use crate::embedding::EmbeddingService;
use crate::error::{ConfigError, Result, SemsyncError};
use crate::jobs::{
    Finish, Job, JobList, JobQuery, JobStatus, JobStore, JobType, NewJob, SyncOptions,
    TargetType, ALL_PARTITIONS,
};
use crate::pipeline::{JobCheckpoint, SyncContext, SyncOutcome, SyncPipeline, PHASE_DISCOVER};
use crate::store::{SearchFilter, SearchHit, SqliteVectorStore};

use super::cancel::{CancelFlag, CancellationRegistry};

/// Step recorded on a job that completed.
pub const STEP_COMPLETED: &str = "completed";
/// Step recorded on a job that stopped at a cancellation checkpoint.
pub const STEP_CANCELLED: &str = "cancelled";

/// Pause before the second attempt to record a job's outcome.
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The job as [`Finish`] leaves it, built without reading the row.
fn terminal_job(mut job: Job, finish: &Finish<'_>) -> Job {
    let now = Utc::now();
    job.status = finish.status;
    if let Some(progress) = finish.progress {
        job.progress = progress;
    }
    job.current_step = Some(finish.current_step.to_string());
    job.results = finish.results.cloned();
    job.error_message = finish.error_message.map(str::to_string);
    job.completed_at = Some(now);
    job
}

/// Owns job records and drives each job through its lifecycle.
///
/// A job runs at most once: [`run_job`](Self::run_job) claims it with an
/// atomic `pending -> running` update, and only the caller that wins the
/// claim executes the pipeline.
pub struct SyncOrchestrator {
    jobs: JobStore,
    bus: Arc<JobEventBus>,
    pipeline: SyncPipeline,
    cancellations: CancellationRegistry,
    permits: Semaphore,
}

impl SyncOrchestrator {
    pub fn new(
        jobs: JobStore,
        bus: Arc<JobEventBus>,
        pipeline: SyncPipeline,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            jobs,
            bus,
            pipeline,
            cancellations: CancellationRegistry::new(),
            permits: Semaphore::new(max_concurrent_jobs.max(1)),
        }
    }

    /// Wires the SQLite stores, the configured embedding provider, and the
    /// configured partition sources. Fails fast if no provider can be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "no database_path configured and no home directory found".to_string(),
        })?;
        let db = Database::open(&path)?;
        let embedder = EmbeddingService::from_config(&config.embedding)?;

        let pipeline = SyncPipeline::new(
            Arc::new(PartitionCatalog::from_config(config)),
            Arc::new(SqliteVectorStore::new(db.clone())),
            embedder,
        )
        .with_default_batch_size(config.sync.default_batch_size);

        info!(
            partitions = config.partitions.len(),
            max_concurrent_jobs = config.sync.max_concurrent_jobs,
            "Sync orchestrator ready"
        );

        Ok(Self::new(
            JobStore::new(db),
            Arc::new(JobEventBus::new(config.sync.event_channel_capacity)),
            pipeline,
            config.sync.max_concurrent_jobs,
        ))
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn bus(&self) -> &Arc<JobEventBus> {
        &self.bus
    }

    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    /// Validates and stores a new pending job.
    pub fn create_job(&self, new_job: &NewJob) -> Result<Job> {
        self.validate(new_job)?;
        let job = self.jobs.create(new_job)?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            partition_key = job.bus_key(),
            "Created sync job"
        );
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .get(job_id)?
            .ok_or_else(|| SemsyncError::job_not_found(job_id))
    }

    pub fn list_jobs(&self, query: &JobQuery) -> Result<JobList> {
        Ok(self.jobs.query(query)?)
    }

    /// Requests cancellation. The job stops at its next checkpoint; a
    /// pending job is cancelled as soon as it is claimed. Terminal jobs are
    /// returned unchanged.
    pub fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let job = self.get_job(job_id)?;
        if job.status.is_terminal() {
            debug!(job_id, status = %job.status, "Cancel ignored for finished job");
            return Ok(job);
        }

        self.jobs.request_cancel(job_id)?;
        let running_here = self.cancellations.cancel(job_id);
        info!(job_id, running_here, "Cancellation requested");
        self.get_job(job_id)
    }

    /// Claims and executes a job on the current task, waiting for a free
    /// slot first. Returns the job in its terminal state.
    pub async fn run_job(&self, job_id: &str) -> Result<Job> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SemsyncError::Shutdown)?;

        // Read before claiming so nothing after the claim depends on the row
        // being readable.
        let mut job = self.get_job(job_id)?;
        if !self.jobs.claim(job_id, PHASE_DISCOVER)? {
            let job = self.get_job(job_id)?;
            return Err(SemsyncError::JobNotClaimable {
                job_id: job.id,
                status: job.status,
            });
        }
        job.status = JobStatus::Running;
        job.current_step = Some(PHASE_DISCOVER.to_string());

        let cancel = self.cancellations.register(job_id);
        let result = self.execute(job, cancel).await;
        self.cancellations.remove(job_id);
        result
    }

    /// Drives a claimed job to a terminal state. Past the claim every
    /// failure ends in [`finalize`](Self::finalize).
    async fn execute(&self, job: Job, cancel: CancelFlag) -> Result<Job> {
        let job_id = job.id.clone();
        info!(job_id = %job_id, job_type = %job.job_type, partition_key = job.bus_key(), "Job started");
        self.publish(JobEvent::running(
            &job.id,
            job.partition_key.as_deref(),
            0.0,
            PHASE_DISCOVER,
        ));

        let options = match SyncOptions::for_job(&job) {
            Ok(options) => options,
            Err(e) => {
                let message = format!("Invalid job parameters: {}", e);
                let finish = Finish {
                    status: JobStatus::Failed,
                    progress: None,
                    current_step: PHASE_DISCOVER,
                    results: None,
                    error_message: Some(&message),
                };
                return self.finalize(job, &finish).await;
            }
        };

        let reporter = JobCheckpoint::new(
            &job.id,
            job.partition_key.as_deref(),
            self.jobs.clone(),
            Arc::clone(&self.bus),
            cancel,
        );
        let (outcome, ctx) = self
            .pipeline
            .run(SyncContext::new(job, options), &reporter)
            .await;
        let mut job = ctx.job;
        job.progress = reporter.last_checkpoint().0;

        match outcome {
            SyncOutcome::Completed(ref results) => {
                let finish = Finish {
                    status: JobStatus::Completed,
                    progress: Some(1.0),
                    current_step: STEP_COMPLETED,
                    results: Some(results),
                    error_message: None,
                };
                self.finalize(job, &finish).await
            }
            SyncOutcome::Cancelled(ref results) => {
                let finish = Finish {
                    status: JobStatus::Cancelled,
                    progress: None,
                    current_step: STEP_CANCELLED,
                    results: Some(results),
                    error_message: None,
                };
                self.finalize(job, &finish).await
            }
            SyncOutcome::Failed {
                ref error,
                ref results,
            } => {
                error!(job_id = %job_id, error = %error, "Job failed");
                let message = error.to_string();
                // The failed phase stays visible as the job's step.
                let (_, step) = reporter.last_checkpoint();
                let finish = Finish {
                    status: JobStatus::Failed,
                    progress: None,
                    current_step: &step,
                    results: Some(results),
                    error_message: Some(&message),
                };
                self.finalize(job, &finish).await
            }
        }
    }

    /// Writes the terminal state, retrying once, and announces it.
    ///
    /// When the row cannot be written a `failed` event is still published,
    /// and the row is left for [`recover_interrupted`](Self::recover_interrupted).
    async fn finalize(&self, job: Job, finish: &Finish<'_>) -> Result<Job> {
        let written = match self.jobs.finish(&job.id, finish) {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to record job outcome, retrying");
                tokio::time::sleep(FINISH_RETRY_DELAY).await;
                self.jobs.finish(&job.id, finish)
            }
        };

        match written {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id = %job.id, "Job left the running state before it could be finished");
            }
            Err(e) => {
                // The row stays running until recovery marks it failed, so
                // subscribers are told the same.
                let message = format!("job outcome could not be recorded: {}", e);
                let failed = Finish {
                    status: JobStatus::Failed,
                    error_message: Some(&message),
                    ..finish.clone()
                };
                let terminal = terminal_job(job, &failed);
                error!(job_id = %terminal.id, error = %e, "Job outcome could not be recorded");
                self.publish(JobEvent::from_job(&terminal));
                return Err(e.into());
            }
        }

        let terminal = terminal_job(job, finish);
        let job = match self.jobs.get(&terminal.id) {
            Ok(Some(row)) => row,
            Ok(None) => terminal,
            Err(e) => {
                warn!(job_id = %terminal.id, error = %e, "Failed to read back finished job");
                terminal
            }
        };
        info!(job_id = %job.id, status = %job.status, progress = job.progress, "Job finished");
        self.publish(JobEvent::from_job(&job));
        Ok(job)
    }

    /// Runs a job on a new tokio task.
    pub fn spawn_job(self: &Arc<Self>, job_id: &str) -> JoinHandle<Result<Job>> {
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let result = this.run_job(&job_id).await;
            if let Err(ref e) = result {
                error!(job_id = %job_id, error = %e, "Spawned job did not run to completion");
            }
            result
        })
    }

    /// Stops admitting jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        info!("Shutting down sync orchestrator");
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn subscribe(&self, partition_key: &str) -> JobEventReceiver {
        self.bus.subscribe(partition_key)
    }

    pub fn unsubscribe(&self, partition_key: &str, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(partition_key, id)
    }

    /// Nearest indexed documents for a free-text query.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.pipeline.embedder().embed_one(query).await?;
        Ok(self.pipeline.store().search(&vector, filter, limit).await?)
    }

    /// Fails jobs a previous process left running. Call once at startup.
    pub fn recover_interrupted(&self) -> Result<u64> {
        Ok(self.jobs.recover_interrupted()?)
    }

    fn publish(&self, event: JobEvent) {
        let key = event.partition_key.as_deref().unwrap_or(ALL_PARTITIONS);
        if self.bus.has_subscribers(key) {
            self.bus.publish(&event);
        }
    }

    fn validate(&self, new_job: &NewJob) -> Result<()> {
        let invalid = |msg: String| Err(SemsyncError::InvalidJob(msg));

        if let Some(ref key) = new_job.partition_key {
            if key.trim().is_empty() || key == ALL_PARTITIONS {
                return invalid(format!("partition key '{}' is not a partition name", key));
            }
        }
        if let Some(ref id) = new_job.target_id {
            if id.trim().is_empty() {
                return invalid("target_id must not be blank".to_string());
            }
            if new_job.target_type.is_none() {
                return invalid("target_id requires a target_type".to_string());
            }
        }
        if !(new_job.parameters.is_object() || new_job.parameters.is_null()) {
            return invalid("parameters must be a JSON object".to_string());
        }
        if let Err(e) = SyncOptions::from_parameters(&new_job.parameters) {
            return invalid(format!("invalid parameters: {}", e));
        }

        match new_job.job_type {
            JobType::SingleTable => {
                if new_job.target_type != Some(TargetType::Table) || new_job.target_id.is_none() {
                    return invalid("single_table needs target_type 'table' and a target_id".to_string());
                }
            }
            JobType::SingleEntity => {
                let entity_like = matches!(
                    new_job.target_type,
                    Some(TargetType::Entity | TargetType::Metric | TargetType::Template)
                );
                if !entity_like || new_job.target_id.is_none() {
                    return invalid(
                        "single_entity needs target_type 'entity', 'metric' or 'template' and a target_id"
                            .to_string(),
                    );
                }
            }
            JobType::FullSync | JobType::Incremental | JobType::BulkRegenerate => {}
        }
        if matches!(new_job.job_type, JobType::SingleTable | JobType::SingleEntity)
            && new_job.partition_key.is_none()
        {
            return invalid(format!("{} needs a partition_key", new_job.job_type));
        }

        // Bulk regeneration reads the store, which may hold partitions no
        // longer configured.
        if new_job.job_type != JobType::BulkRegenerate {
            if let Some(ref key) = new_job.partition_key {
                let known = self.pipeline.catalog().partitions();
                if !known.is_empty() && !known.contains(key) {
                    return Err(SemsyncError::NotFound {
                        kind: "Partition",
                        id: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
