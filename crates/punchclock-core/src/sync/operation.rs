//! Queued operations and their state machine
//!
//! ```text
//! pending ──► in_flight ──► completed
//!    ▲            │
//!    └── retry ───┤
//!                 └──► failed (attempts exhausted)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EntityType, OperationKind, SyncEntity};

/// Where an operation is in its delivery lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Waiting for dispatch (first attempt or scheduled retry)
    Pending,
    /// A remote call is outstanding
    InFlight,
    /// Acknowledged by the server
    Completed,
    /// Retry budget exhausted
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::InFlight => "in_flight",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pending mutation
///
/// The entity snapshot is immutable once enqueued. Two updates to the same
/// shift stay two operations and replay in enqueue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub kind: OperationKind,
    pub entity_id: String,
    pub entity: SyncEntity,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: OperationState,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time a retry may be dispatched
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Create a new pending operation
    pub fn new(kind: OperationKind, entity: SyncEntity, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: generate_operation_id(now),
            kind,
            entity_id: entity.entity_id().to_string(),
            entity,
            enqueued_at: now,
            attempts: 0,
            max_attempts,
            state: OperationState::Pending,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            completed_at: None,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }

    /// Whether the processor may still dispatch this operation
    pub fn is_retry_eligible(&self) -> bool {
        match self.state {
            OperationState::Pending => true,
            OperationState::Failed => self.attempts < self.max_attempts,
            OperationState::InFlight | OperationState::Completed => false,
        }
    }

    /// Whether a scheduled retry delay has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Linear backoff: the n-th failed attempt waits `n * base`
pub fn retry_delay(attempts: u32, base: Duration) -> Duration {
    base.saturating_mul(attempts.max(1))
}

/// Operation id: unix millis plus a random suffix
fn generate_operation_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}
