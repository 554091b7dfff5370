//! In-process fan-out of job events, grouped by partition key.
//!
//! Each subscriber owns a bounded broadcast ring. When the ring is full the
//! oldest event is overwritten, so a slow observer always sees the most
//! recent state and never stalls the publishing job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::event::JobEvent;
use crate::jobs::ALL_PARTITIONS;

/// Default per-subscriber queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Handle identifying one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Event bus lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    sender: broadcast::Sender<JobEvent>,
}

/// Receiving half of a bus subscription.
///
/// [`recv`](Self::recv) yields queued events and returns `None` once the
/// subscription has been removed and the queue is drained. Events
/// overwritten while the receiver lagged are skipped.
pub struct JobEventReceiver {
    id: SubscriptionId,
    partition_key: String,
    capacity: usize,
    receiver: broadcast::Receiver<JobEvent>,
    closed: bool,
}

impl JobEventReceiver {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    fn lagged(&self, skipped: u64) {
        tracing::trace!(
            partition_key = %self.partition_key,
            subscription = self.id.0,
            skipped,
            "Subscriber lagged, oldest events were dropped"
        );
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        // After a lag the ring still holds at most `capacity` events.
        self.receiver.len().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once a receive has observed that the subscription was removed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for JobEventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEventReceiver")
            .field("id", &self.id)
            .field("partition_key", &self.partition_key)
            .finish()
    }
}

/// Partition-keyed publish/subscribe bus for [`JobEvent`]s.
///
/// The subscriber map is the only locked structure; `publish` copies the
/// relevant subscriber list and delivers outside the lock.
pub struct JobEventBus {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl JobEventBus {
    /// Creates a bus whose subscriber queues hold `capacity` events,
    /// rounded up to a power of two like the underlying broadcast ring.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1).next_power_of_two(),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a new bounded queue under `partition_key`.
    pub fn subscribe(&self, partition_key: &str) -> JobEventReceiver {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = broadcast::channel(self.capacity);

        lock(&self.subscribers)
            .entry(partition_key.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        tracing::debug!(partition_key, subscription = id.0, "Subscribed to job events");

        JobEventReceiver {
            id,
            partition_key: partition_key.to_string(),
            capacity: self.capacity,
            receiver,
            closed: false,
        }
    }

    /// Removes a subscription. The last subscription for a key frees the
    /// key. Returns `false` if the subscription was not registered.
    pub fn unsubscribe(&self, partition_key: &str, id: SubscriptionId) -> bool {
        let removed = {
            let mut map = lock(&self.subscribers);
            let Some(subs) = map.get_mut(partition_key) else {
                return false;
            };
            let removed = subs
                .iter()
                .position(|s| s.id == id)
                .map(|pos| subs.swap_remove(pos));
            if subs.is_empty() {
                map.remove(partition_key);
            }
            removed
        };

        match removed {
            // Dropping the sender closes the stream once it is drained.
            Some(_) => {
                tracing::debug!(partition_key, subscription = id.0, "Unsubscribed from job events");
                true
            }
            None => false,
        }
    }

    /// Delivers `event` to every subscriber of its partition key.
    ///
    /// Never blocks and never fails. Returns how many subscribers received
    /// the event.
    pub fn publish(&self, event: &JobEvent) -> usize {
        let key = event.partition_key.as_deref().unwrap_or(ALL_PARTITIONS);

        let targets: Vec<(SubscriptionId, broadcast::Sender<JobEvent>)> = {
            let map = lock(&self.subscribers);
            match map.get(key) {
                Some(subs) => subs.iter().map(|s| (s.id, s.sender.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut disconnected = Vec::new();
        for (id, sender) in targets {
            // A full ring overwrites its oldest event; `send` only fails
            // when the receiving half is gone.
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(
                    partition_key = key,
                    subscription = id.0,
                    job_id = %event.job_id,
                    "Skipping delivery to disconnected subscriber"
                );
                disconnected.push(id);
            }
        }

        for id in disconnected {
            self.unsubscribe(key, id);
        }

        delivered
    }

    /// Cheap check used to skip event construction when nobody listens.
    pub fn has_subscribers(&self, partition_key: &str) -> bool {
        lock(&self.subscribers)
            .get(partition_key)
            .is_some_and(|subs| !subs.is_empty())
    }

    pub fn subscriber_count(&self, partition_key: &str) -> usize {
        lock(&self.subscribers)
            .get(partition_key)
            .map_or(0, |subs| subs.len())
    }

    /// Number of partition keys with at least one subscriber.
    pub fn partition_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}
