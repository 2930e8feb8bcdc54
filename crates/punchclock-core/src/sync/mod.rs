//! Offline sync engine
//!
//! - [`OperationQueue`]: durable FIFO of pending mutations
//! - [`QueueProcessor`]: drains the queue against the remote API with linear
//!   retry backoff
//! - [`SyncOrchestrator`]: full bidirectional sync, status and timers
//!
//! All background work is owned by one [`TimerRegistry`] so that
//! [`SyncOrchestrator::stop_all_timers`] leaves nothing running.

mod operation;
mod orchestrator;
mod processor;
mod queue;
mod replica;
mod status;
mod timers;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

pub use operation::{retry_delay, OperationState, SyncOperation};
pub use orchestrator::{SyncDependencies, SyncError, SyncOrchestrator, SyncReport, LAST_SYNC_KEY};
pub use processor::{DispatchOutcome, DrainReport, QueueProcessor, SkipReason};
pub use queue::{OperationQueue, QueueStats, QUEUE_KEY};
pub use replica::{LocalReplica, MergeOutcome, ReplicaEntry, REPLICA_KEY};
pub use status::{StatusHub, Subscription, SyncStatus};
pub use timers::TimerRegistry;

/// Runtime tunables of the sync engine
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Period of the timer-driven queue drain
    pub drain_interval: Duration,
    /// Retry delay is `attempts * retry_base_delay`
    pub retry_base_delay: Duration,
    /// Dispatch attempts before an operation is marked failed
    pub max_attempts: u32,
    /// A full sync older than this is due again
    pub freshness_window: Duration,
    /// Bound on every remote call
    pub request_timeout: Duration,
    /// Period of the automatic full sync
    pub auto_sync_interval: Duration,
    /// Period of the completed-operation cleanup
    pub cleanup_interval: Duration,
    /// Completed operations older than this are removed by cleanup
    pub completed_retention: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(5),
            max_attempts: 3,
            freshness_window: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(15),
            auto_sync_interval: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            completed_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}
