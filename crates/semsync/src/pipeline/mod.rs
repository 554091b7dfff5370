pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use context::{PendingEmbedding, SyncContext, WorkItem};
pub use error::PipelineError;
pub use progress::{JobCheckpoint, NoopProgress, ProgressReporter, ProgressTracker, MAX_RUNNING_PROGRESS};
pub use runner::{
    SyncOutcome, SyncPipeline, PHASE_AGGREGATE, PHASE_BUILD, PHASE_DISCOVER, PHASE_EMBED,
    PHASE_INDEX,
};
