//! Job progress notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{Job, JobResults, JobStatus};

/// An immutable snapshot of a job's progress.
///
/// Events are transient; the job row is the source of truth and a missed
/// event is recovered by re-reading the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<JobResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobEvent {
    /// Snapshots the current state of a job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            partition_key: job.partition_key.clone(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            timestamp: Utc::now(),
            results: job.results.clone(),
            error_message: job.error_message.clone(),
        }
    }

    /// A `running` progress event.
    pub fn running(job_id: &str, partition_key: Option<&str>, progress: f64, step: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            partition_key: partition_key.map(str::to_string),
            status: JobStatus::Running,
            progress,
            current_step: Some(step.to_string()),
            timestamp: Utc::now(),
            results: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
