pub mod cancel;
pub mod orchestrator;

pub use cancel::{CancelFlag, CancellationRegistry};
pub use orchestrator::{SyncOrchestrator, STEP_CANCELLED, STEP_COMPLETED};
