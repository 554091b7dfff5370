//! Job domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bus key used for jobs that span every partition.
pub const ALL_PARTITIONS: &str = "*";

/// Kind of synchronization work a job performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullSync,
    Incremental,
    SingleTable,
    SingleEntity,
    BulkRegenerate,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullSync => "full_sync",
            JobType::Incremental => "incremental",
            JobType::SingleTable => "single_table",
            JobType::SingleEntity => "single_entity",
            JobType::BulkRegenerate => "bulk_regenerate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full_sync" => Some(JobType::FullSync),
            "incremental" => Some(JobType::Incremental),
            "single_table" => Some(JobType::SingleTable),
            "single_entity" => Some(JobType::SingleEntity),
            "bulk_regenerate" => Some(JobType::BulkRegenerate),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// `pending -> running -> {completed | failed | cancelled}`. The three
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrower scope a job can be restricted to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Table,
    Column,
    Entity,
    Metric,
    Template,
    Document,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Table => "table",
            TargetType::Column => "column",
            TargetType::Entity => "entity",
            TargetType::Metric => "metric",
            TargetType::Template => "template",
            TargetType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(TargetType::Table),
            "column" => Some(TargetType::Column),
            "entity" => Some(TargetType::Entity),
            "metric" => Some(TargetType::Metric),
            "template" => Some(TargetType::Template),
            "document" => Some(TargetType::Document),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary written to a job when it finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResults {
    pub tables_synced: u64,
    pub columns_synced: u64,
    pub entities_synced: u64,
    pub metrics_synced: u64,
    pub templates_synced: u64,
    pub documents_synced: u64,
    /// Documents written or refreshed in the build phase.
    pub documents_built: u64,
    /// Documents skipped because their content hash was unchanged.
    pub documents_unchanged: u64,
    pub documents_embedded: u64,
    pub documents_indexed: u64,
    pub documents_pruned: u64,
    /// Non-fatal, per-target failures.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl JobResults {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// A synchronization job as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub parameters: Value,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<JobResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Job {
    /// Key under which this job's events are published.
    pub fn bus_key(&self) -> &str {
        self.partition_key.as_deref().unwrap_or(ALL_PARTITIONS)
    }
}

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub partition_key: Option<String>,
    pub target_type: Option<TargetType>,
    pub target_id: Option<String>,
    pub parameters: Value,
}

impl NewJob {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            partition_key: None,
            target_type: None,
            target_id: None,
            parameters: Value::Object(Default::default()),
        }
    }

    pub fn partition(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn target(mut self, target_type: TargetType, target_id: impl Into<String>) -> Self {
        self.target_type = Some(target_type);
        self.target_id = Some(target_id.into());
        self
    }

    pub fn target_type(mut self, target_type: TargetType) -> Self {
        self.target_type = Some(target_type);
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Pipeline knobs read out of a job's `parameters` bag.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub force_refresh: bool,
    pub batch_size: Option<usize>,
    /// Attached SQLite schemas to introspect.
    pub schemas: Vec<String>,
    /// Restricts table discovery to these names.
    pub tables: Vec<String>,
}

impl SyncOptions {
    /// Reads options from a parameters bag. `null` is treated as empty.
    pub fn from_parameters(parameters: &Value) -> Result<Self, serde_json::Error> {
        if parameters.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(parameters.clone())
    }

    /// Options as the pipeline sees them for a given job type.
    /// Full syncs and bulk regeneration always refresh.
    pub fn for_job(job: &Job) -> Result<Self, serde_json::Error> {
        let mut options = Self::from_parameters(&job.parameters)?;
        if matches!(job.job_type, JobType::FullSync | JobType::BulkRegenerate) {
            options.force_refresh = true;
        }
        if options.batch_size == Some(0) {
            options.batch_size = None;
        }
        Ok(options)
    }
}
