use std::collections::HashSet;

use crate::catalog::{SyncScope, SyncTarget};
use crate::jobs::{Job, JobResults, SyncOptions};
use crate::store::{Document, DocumentKey};

use super::progress::ProgressTracker;

/// A unit of work found in the discover phase.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// Content still to be loaded from a source catalog.
    Source {
        partition_key: String,
        target: SyncTarget,
    },
    /// A stored document being re-embedded.
    Stored(Document),
}

/// A document waiting for its embedding.
#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub key: DocumentKey,
    pub text: String,
}

pub struct SyncContext {
    // Input
    pub job: Job,
    pub options: SyncOptions,
    pub scope: SyncScope,

    // Discover result; the count is fixed once discovery ends
    pub partitions: Vec<String>,
    pub items: Vec<WorkItem>,
    pub progress: ProgressTracker,

    // Build results
    pub pending: Vec<PendingEmbedding>,
    /// Every document key produced by this run, embedded or not.
    pub seen: HashSet<DocumentKey>,
    /// Unchanged documents; indexed in phase 4 if an earlier run stopped short.
    pub unchanged: Vec<DocumentKey>,
    /// (partition, target key) pairs whose load failed. Their documents are
    /// never pruned.
    pub failed_targets: HashSet<(String, String)>,

    // Embed results
    pub embedded: Vec<DocumentKey>,

    pub results: JobResults,
}

impl SyncContext {
    pub fn new(job: Job, options: SyncOptions) -> Self {
        let scope = SyncScope::for_job(&job, &options);
        Self {
            job,
            options,
            scope,
            partitions: Vec::new(),
            items: Vec::new(),
            progress: ProgressTracker::new(),
            pending: Vec::new(),
            seen: HashSet::new(),
            unchanged: Vec::new(),
            failed_targets: HashSet::new(),
            embedded: Vec::new(),
            results: JobResults::default(),
        }
    }

    /// Records a non-fatal error against the job's results.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.results.record_error(message);
    }
}
