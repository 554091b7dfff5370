use std::sync::{Arc, Mutex};

use crate::broadcast::{JobEvent, JobEventBus};
use crate::jobs::JobStore;
use crate::worker::CancelFlag;

use super::error::PipelineError;

/// Highest progress a job reports before it completes.
pub const MAX_RUNNING_PROGRESS: f64 = 0.99;

/// Completed-units over discovered-units, never moving backward.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total: usize,
    done: usize,
    reported: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the known unit count. A lower count is ignored.
    pub fn set_total(&mut self, total: usize) {
        self.total = self.total.max(total);
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Marks `units` as done and returns the progress to report.
    pub fn advance(&mut self, units: usize) -> f64 {
        self.done = (self.done + units).min(self.total);
        if self.total > 0 {
            let fraction = (self.done as f64 / self.total as f64).min(MAX_RUNNING_PROGRESS);
            self.reported = self.reported.max(fraction);
        }
        self.reported
    }

    pub fn current(&self) -> f64 {
        self.reported
    }
}

/// Receives the pipeline's checkpoints.
pub trait ProgressReporter: Send + Sync {
    /// Persists and announces the job's progress.
    fn checkpoint(&self, progress: f64, step: &str) -> Result<(), PipelineError>;

    /// Whether cancellation has been requested.
    fn cancel_requested(&self) -> bool;
}

/// Reporter for tests that only exercise the phases.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn checkpoint(&self, _progress: f64, _step: &str) -> Result<(), PipelineError> {
        Ok(())
    }

    fn cancel_requested(&self) -> bool {
        false
    }
}

/// Writes checkpoints to the job row, then publishes them on the bus.
pub struct JobCheckpoint {
    job_id: String,
    partition_key: Option<String>,
    jobs: JobStore,
    bus: Arc<JobEventBus>,
    cancel: CancelFlag,
    /// Last checkpoint attempted, kept even if persisting it failed.
    last: Mutex<(f64, String)>,
}

impl JobCheckpoint {
    pub fn new(
        job_id: &str,
        partition_key: Option<&str>,
        jobs: JobStore,
        bus: Arc<JobEventBus>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            partition_key: partition_key.map(str::to_string),
            jobs,
            bus,
            cancel,
            last: Mutex::new((0.0, super::runner::PHASE_DISCOVER.to_string())),
        }
    }

    /// Progress and step of the most recent checkpoint.
    pub fn last_checkpoint(&self) -> (f64, String) {
        match self.last.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn bus_key(&self) -> &str {
        self.partition_key
            .as_deref()
            .unwrap_or(crate::jobs::ALL_PARTITIONS)
    }
}

impl ProgressReporter for JobCheckpoint {
    fn checkpoint(&self, progress: f64, step: &str) -> Result<(), PipelineError> {
        {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = (last.0.max(progress), step.to_string());
        }
        if !self.jobs.checkpoint(&self.job_id, progress, step)? {
            tracing::debug!(job_id = %self.job_id, step, "Checkpoint skipped, job is not running");
        }

        if self.bus.has_subscribers(self.bus_key()) {
            self.bus.publish(&JobEvent::running(
                &self.job_id,
                self.partition_key.as_deref(),
                progress,
                step,
            ));
        }
        Ok(())
    }

    fn cancel_requested(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        // Another process may have flagged the row.
        match self.jobs.cancel_requested(&self.job_id) {
            Ok(true) => {
                self.cancel.cancel();
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to read cancel flag");
                false
            }
        }
    }
}
