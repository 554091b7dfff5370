//! Job store: typed access to the `jobs` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{Job, JobResults, JobStatus, JobType, NewJob, TargetType};
use crate::db::job_repo::{self, JobCompletion, JobFilter, JobRow};
use crate::db::{Database, DatabaseError};

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn now() -> String {
    format_timestamp(Utc::now())
}

impl Job {
    /// Builds a domain job from a database row. Unknown enum strings are
    /// logged and mapped to a safe default.
    pub fn from_row(row: &JobRow) -> Self {
        let job_type = JobType::parse(&row.job_type).unwrap_or_else(|| {
            log::warn!(
                "Unknown job type '{}' for job {}, defaulting to full_sync",
                row.job_type,
                row.id
            );
            JobType::FullSync
        });
        let status = JobStatus::parse(&row.status).unwrap_or_else(|| {
            log::warn!(
                "Unknown job status '{}' for job {}, defaulting to failed",
                row.status,
                row.id
            );
            JobStatus::Failed
        });
        let target_type = row.target_type.as_deref().and_then(|s| {
            let parsed = TargetType::parse(s);
            if parsed.is_none() {
                log::warn!("Unknown target type '{}' for job {}", s, row.id);
            }
            parsed
        });
        let parameters = serde_json::from_str(&row.parameters).unwrap_or_else(|e| {
            log::warn!("Invalid parameters JSON for job {}: {}", row.id, e);
            Value::Object(Default::default())
        });
        let results = row.results.as_deref().and_then(|s| {
            serde_json::from_str::<JobResults>(s)
                .map_err(|e| log::warn!("Invalid results JSON for job {}: {}", row.id, e))
                .ok()
        });

        Self {
            id: row.id.clone(),
            job_type,
            partition_key: row.partition_key.clone(),
            target_type,
            target_id: row.target_id.clone(),
            parameters,
            status,
            progress: row.progress,
            current_step: row.current_step.clone(),
            results,
            error_message: row.error_message.clone(),
            created_at: parse_timestamp(&row.created_at),
            started_at: row.started_at.as_deref().map(parse_timestamp),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            cancel_requested: row.cancel_requested,
        }
    }
}

/// Query parameters for job listing.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub partition_key: Option<String>,
    pub job_type: Option<JobType>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A page of jobs plus the total number of matches.
#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Terminal values for [`JobStore::finish`].
#[derive(Debug, Clone)]
pub struct Finish<'a> {
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub current_step: &'a str,
    pub results: Option<&'a JobResults>,
    pub error_message: Option<&'a str>,
}

/// Persistent job store backed by rusqlite.
///
/// The store holds no cached job state; every read goes to the database.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new pending job.
    pub fn create(&self, new_job: &NewJob) -> Result<Job, DatabaseError> {
        let timestamp = now();
        let parameters =
            serde_json::to_string(&new_job.parameters).map_err(|e| DatabaseError::Serialization {
                column: "parameters",
                source: e,
            })?;

        let row = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: new_job.job_type.as_str().to_string(),
            partition_key: new_job.partition_key.clone(),
            target_type: new_job.target_type.map(|t| t.as_str().to_string()),
            target_id: new_job.target_id.clone(),
            parameters,
            status: JobStatus::Pending.as_str().to_string(),
            progress: 0.0,
            current_step: None,
            results: None,
            error_message: None,
            created_at: timestamp.clone(),
            started_at: None,
            completed_at: None,
            updated_at: timestamp,
            cancel_requested: false,
        };
        job_repo::insert(&self.db, &row)?;
        Ok(Job::from_row(&row))
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        Ok(job_repo::find_by_id(&self.db, id)?.map(|row| Job::from_row(&row)))
    }

    pub fn query(&self, params: &JobQuery) -> Result<JobList, DatabaseError> {
        let filter = JobFilter {
            status: params.status.map(|s| s.as_str().to_string()),
            partition_key: params.partition_key.clone(),
            job_type: params.job_type.map(|t| t.as_str().to_string()),
            limit: params.limit,
            offset: params.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        Ok(JobList {
            jobs: rows.iter().map(Job::from_row).collect(),
            total,
            limit: params.limit,
            offset: params.offset,
        })
    }

    /// Claims a pending job for execution. See [`job_repo::claim`].
    pub fn claim(&self, id: &str, first_step: &str) -> Result<bool, DatabaseError> {
        job_repo::claim(&self.db, id, first_step, &now())
    }

    pub fn checkpoint(&self, id: &str, progress: f64, step: &str) -> Result<bool, DatabaseError> {
        job_repo::checkpoint(&self.db, id, progress.clamp(0.0, 1.0), step, &now())
    }

    pub fn finish(&self, id: &str, finish: &Finish<'_>) -> Result<bool, DatabaseError> {
        let results = finish
            .results
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization {
                column: "results",
                source: e,
            })?;
        let completion = JobCompletion {
            status: finish.status.as_str(),
            progress: finish.progress,
            current_step: finish.current_step,
            results,
            error_message: finish.error_message.map(str::to_string),
        };
        job_repo::finish(&self.db, id, &completion, &now())
    }

    pub fn request_cancel(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::request_cancel(&self.db, id, &now())
    }

    pub fn cancel_requested(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::is_cancel_requested(&self.db, id)
    }

    /// Fails jobs left `running` by a previous process.
    pub fn recover_interrupted(&self) -> Result<u64, DatabaseError> {
        let count = job_repo::fail_running(&self.db, "interrupted", &now())?;
        if count > 0 {
            log::warn!("Marked {} interrupted job(s) as failed", count);
        }
        Ok(count)
    }

    pub fn count_by_status(&self, status: JobStatus) -> Result<u64, DatabaseError> {
        job_repo::count_by_status(&self.db, status.as_str())
    }
}
