//! Synchronization jobs: domain types and persistent store.

pub mod model;
pub mod store;

pub use model::{
    Job, JobResults, JobStatus, JobType, NewJob, SyncOptions, TargetType, ALL_PARTITIONS,
};
pub use store::{Finish, JobList, JobQuery, JobStore};
