//! Cooperative cancellation, polled by the pipeline at checkpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared cancellation flag for one running job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Flags of the jobs running in this process, by job id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    flags: Mutex<HashMap<String, CancelFlag>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the flag for `job_id`, creating it if needed.
    pub fn register(&self, job_id: &str) -> CancelFlag {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    /// Raises the flag of a job running here. Returns `false` if the job
    /// is not running in this process.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self
            .flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
        {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: &str) {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
    }

    pub fn len(&self) -> usize {
        self.flags.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
