//! Job progress broadcasting.
//!
//! Events flow from the sync pipeline to any number of observers grouped by
//! partition key. Delivery is best effort; the job store stays authoritative.

pub mod event;
pub mod event_bus;

pub use event::JobEvent;
pub use event_bus::{JobEventBus, JobEventReceiver, SubscriptionId, DEFAULT_CHANNEL_CAPACITY};
