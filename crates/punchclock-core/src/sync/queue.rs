//! Durable operation queue
//!
//! The queue is the single source of truth for what still has to reach the
//! server. It lives in memory and is rewritten as one JSON blob under
//! [`QUEUE_KEY`] after every mutation. A failed save is logged and ignored:
//! the in-memory copy stays authoritative and the next save carries the same
//! operations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::operation::{retry_delay, OperationState, SyncOperation};
use super::SyncSettings;
use crate::models::{OperationKind, SyncEntity};
use crate::storage::{KeyValueStore, StorageResult};

/// Store key of the persisted queue
pub const QUEUE_KEY: &str = "sync_queue";

/// Where an unreadable queue blob is moved before starting empty
const CORRUPT_KEY: &str = "sync_queue.corrupt";

/// Persisted aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncQueue {
    operations: Vec<SyncOperation>,
    #[serde(default)]
    last_processed_at: Option<DateTime<Utc>>,
}

/// Counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending: Option<DateTime<Utc>>,
}

impl QueueStats {
    fn compute(operations: &[SyncOperation]) -> Self {
        let mut stats = QueueStats {
            total: operations.len(),
            ..Self::default()
        };

        for op in operations {
            match op.state {
                OperationState::Pending => {
                    stats.pending += 1;
                    stats.oldest_pending = Some(match stats.oldest_pending {
                        Some(oldest) => oldest.min(op.enqueued_at),
                        None => op.enqueued_at,
                    });
                }
                OperationState::InFlight => stats.in_flight += 1,
                OperationState::Completed => stats.completed += 1,
                OperationState::Failed => stats.failed += 1,
            }
        }

        stats
    }
}

/// What happens after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Back to pending, due again after the delay
    RetryAfter(Duration),
    /// Attempts exhausted, now failed
    Exhausted,
}

/// The operation queue
///
/// Every mutating method takes the queue lock, applies its transition and
/// saves before releasing it, so no two callers ever interleave on the list.
pub struct OperationQueue {
    inner: Mutex<SyncQueue>,
    store: Arc<dyn KeyValueStore>,
    max_attempts: u32,
    retry_base_delay: Duration,
    retention: Duration,
    stats_tx: watch::Sender<QueueStats>,
}

impl OperationQueue {
    /// Load the queue from the store
    ///
    /// Operations left in flight by a previous process go back to pending;
    /// the attempt they used stays counted, and one with no attempts left is
    /// failed instead. An unreadable blob is copied to
    /// `sync_queue.corrupt` and the queue starts empty. A store read error is
    /// returned rather than risking an overwrite of data we could not read.
    pub async fn load(store: Arc<dyn KeyValueStore>, settings: &SyncSettings) -> StorageResult<Self> {
        let queue = match store.get(QUEUE_KEY).await? {
            Some(blob) => match serde_json::from_str::<SyncQueue>(&blob) {
                Ok(mut queue) => {
                    let interrupted = release_interrupted(&mut queue.operations, |_| false);
                    if interrupted > 0 {
                        info!("Re-queued {} operations interrupted in flight", interrupted);
                    }
                    queue
                }
                Err(e) => {
                    warn!("Sync queue is unreadable, starting empty: {}", e);
                    if let Err(e) = store.set(CORRUPT_KEY, blob).await {
                        warn!("Failed to keep a copy of the unreadable queue: {}", e);
                    }
                    SyncQueue::default()
                }
            },
            None => SyncQueue::default(),
        };

        debug!("Loaded sync queue with {} operations", queue.operations.len());
        let (stats_tx, _) = watch::channel(QueueStats::compute(&queue.operations));

        Ok(Self {
            inner: Mutex::new(queue),
            store,
            max_attempts: settings.max_attempts,
            retry_base_delay: settings.retry_base_delay,
            retention: settings.completed_retention,
            stats_tx,
        })
    }

    /// Append a new pending operation
    ///
    /// Never fails; a persistence error is only logged.
    pub async fn enqueue(&self, kind: OperationKind, entity: SyncEntity) -> SyncOperation {
        let op = SyncOperation::new(kind, entity, self.max_attempts);
        let mut queue = self.inner.lock().await;
        queue.operations.push(op.clone());
        debug!(
            "Enqueued {} {} {} as {}",
            op.kind,
            op.entity_type(),
            op.entity_id,
            op.id
        );
        self.persist(&queue).await;
        op
    }

    /// Retry-eligible operations in enqueue order
    pub async fn list_pending(&self) -> Vec<SyncOperation> {
        let queue = self.inner.lock().await;
        queue
            .operations
            .iter()
            .filter(|op| op.is_retry_eligible())
            .cloned()
            .collect()
    }

    /// Retry-eligible operations whose backoff has elapsed, in enqueue order
    pub async fn due_operations(&self, now: DateTime<Utc>) -> Vec<SyncOperation> {
        let queue = self.inner.lock().await;
        queue
            .operations
            .iter()
            .filter(|op| op.is_retry_eligible() && op.is_due(now))
            .cloned()
            .collect()
    }

    /// Claim an operation for dispatch
    ///
    /// Returns the updated operation, or `None` if it is unknown, already in
    /// flight or completed, or out of attempts. A pending operation found
    /// with no attempts left is failed on the spot.
    pub async fn mark_in_flight(&self, id: &str) -> Option<SyncOperation> {
        let mut queue = self.inner.lock().await;
        let op = queue.operations.iter_mut().find(|op| op.id == id)?;
        if !op.is_retry_eligible() {
            debug!("Not dispatching {}: state is {}", id, op.state);
            return None;
        }
        if op.is_exhausted() {
            warn!("Not dispatching {}: all {} attempts used", id, op.max_attempts);
            op.state = OperationState::Failed;
            op.next_attempt_at = None;
            self.persist(&queue).await;
            return None;
        }

        op.state = OperationState::InFlight;
        op.attempts += 1;
        op.last_attempt_at = Some(Utc::now());
        op.next_attempt_at = None;
        let claimed = op.clone();

        self.persist(&queue).await;
        Some(claimed)
    }

    /// Record a server acknowledgment
    ///
    /// Returns `false` when there was nothing to do: the id is unknown or the
    /// operation was already completed.
    pub async fn mark_completed(&self, id: &str) -> bool {
        let mut queue = self.inner.lock().await;
        let Some(op) = queue.operations.iter_mut().find(|op| op.id == id) else {
            return false;
        };
        if op.state == OperationState::Completed {
            debug!("Ignoring duplicate acknowledgment for {}", id);
            return false;
        }

        op.state = OperationState::Completed;
        op.completed_at = Some(Utc::now());
        op.next_attempt_at = None;
        op.last_error = None;

        self.persist(&queue).await;
        true
    }

    /// Record a failed attempt
    ///
    /// Returns the new state of the operation, or `None` if it was not in
    /// flight.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Option<OperationState> {
        self.mark_failed_at(id, error, Utc::now())
            .await
            .map(|decision| match decision {
                RetryDecision::RetryAfter(_) => OperationState::Pending,
                RetryDecision::Exhausted => OperationState::Failed,
            })
    }

    pub(crate) async fn mark_failed_at(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Option<RetryDecision> {
        let mut queue = self.inner.lock().await;
        let op = queue.operations.iter_mut().find(|op| op.id == id)?;
        if op.state != OperationState::InFlight {
            debug!("Ignoring failure for {}: state is {}", id, op.state);
            return None;
        }

        op.last_error = Some(error.to_string());
        let decision = if op.is_exhausted() {
            op.state = OperationState::Failed;
            op.next_attempt_at = None;
            RetryDecision::Exhausted
        } else {
            let delay = retry_delay(op.attempts, self.retry_base_delay);
            op.state = OperationState::Pending;
            op.next_attempt_at = Some(add_delay(now, delay));
            RetryDecision::RetryAfter(delay)
        };

        self.persist(&queue).await;
        Some(decision)
    }

    /// Release in-flight operations whose dispatch is gone
    ///
    /// `still_sending` names the operations a live dispatch holds; every other
    /// in-flight operation goes back to pending, or to failed when its
    /// attempts are used up.
    pub(crate) async fn requeue_interrupted(&self, still_sending: impl Fn(&str) -> bool) -> usize {
        let mut queue = self.inner.lock().await;
        let released = release_interrupted(&mut queue.operations, still_sending);
        if released > 0 {
            info!("Re-queued {} operations interrupted in flight", released);
            self.persist(&queue).await;
        }
        released
    }

    /// Same as [`requeue_interrupted`](Self::requeue_interrupted) without
    /// waiting for the lock
    ///
    /// Returns `None` when the queue is busy. Stats are published at once; the
    /// store catches up on the next save, and a reload resets in-flight
    /// operations the same way.
    pub(crate) fn try_requeue_interrupted(
        &self,
        still_sending: impl Fn(&str) -> bool,
    ) -> Option<usize> {
        let mut queue = self.inner.try_lock().ok()?;
        let released = release_interrupted(&mut queue.operations, still_sending);
        if released > 0 {
            info!("Re-queued {} operations interrupted in flight", released);
            self.stats_tx
                .send_replace(QueueStats::compute(&queue.operations));
        }
        Some(released)
    }

    /// Re-arm a failed operation with a fresh retry budget
    pub async fn retry_failed(&self, id: &str) -> bool {
        let mut queue = self.inner.lock().await;
        let Some(op) = queue.operations.iter_mut().find(|op| op.id == id) else {
            return false;
        };
        if op.state != OperationState::Failed {
            return false;
        }

        op.state = OperationState::Pending;
        op.attempts = 0;
        op.next_attempt_at = None;
        info!("Re-armed failed operation {}", id);

        self.persist(&queue).await;
        true
    }

    /// Remove completed operations older than the retention window
    pub async fn cleanup(&self) -> usize {
        self.cleanup_before(add_delay_back(Utc::now(), self.retention))
            .await
    }

    pub(crate) async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut queue = self.inner.lock().await;
        let before = queue.operations.len();
        queue
            .operations
            .retain(|op| !(op.state == OperationState::Completed && op.enqueued_at < cutoff));
        let removed = before - queue.operations.len();

        if removed > 0 {
            info!("Removed {} completed operations", removed);
            self.persist(&queue).await;
        }
        removed
    }

    /// Stamp the end of a drain pass and save
    pub async fn record_drain(&self, at: DateTime<Utc>) {
        let mut queue = self.inner.lock().await;
        queue.last_processed_at = Some(at);
        self.persist(&queue).await;
    }

    pub async fn last_processed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_processed_at
    }

    pub async fn get(&self, id: &str) -> Option<SyncOperation> {
        let queue = self.inner.lock().await;
        queue.operations.iter().find(|op| op.id == id).cloned()
    }

    /// All operations in enqueue order
    pub async fn operations(&self) -> Vec<SyncOperation> {
        self.inner.lock().await.operations.clone()
    }

    /// Whether a retry-eligible operation touches the given entity
    pub async fn has_pending_for(&self, entity_id: &str) -> bool {
        let queue = self.inner.lock().await;
        queue
            .operations
            .iter()
            .any(|op| op.entity_id == entity_id && op.is_retry_eligible())
    }

    pub async fn stats(&self) -> QueueStats {
        let queue = self.inner.lock().await;
        QueueStats::compute(&queue.operations)
    }

    /// Stats as of the last mutation, without awaiting the lock
    pub fn current_stats(&self) -> QueueStats {
        self.stats_tx.borrow().clone()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<QueueStats> {
        self.stats_tx.subscribe()
    }

    /// Save the queue and publish fresh stats; the caller holds the lock
    async fn persist(&self, queue: &SyncQueue) {
        self.stats_tx.send_replace(QueueStats::compute(&queue.operations));

        let blob = match serde_json::to_string(queue) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to serialize sync queue: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(QUEUE_KEY, blob).await {
            warn!("Failed to save sync queue, keeping it in memory: {}", e);
        }
    }
}

fn release_interrupted(
    operations: &mut [SyncOperation],
    still_sending: impl Fn(&str) -> bool,
) -> usize {
    let mut released = 0;
    for op in operations
        .iter_mut()
        .filter(|op| op.state == OperationState::InFlight && !still_sending(&op.id))
    {
        if op.is_exhausted() {
            op.state = OperationState::Failed;
            op.last_error
                .get_or_insert_with(|| "Interrupted on the last attempt".to_string());
        } else {
            op.state = OperationState::Pending;
        }
        op.next_attempt_at = None;
        released += 1;
    }
    released
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

fn add_delay_back(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Shift;
    use crate::storage::MemoryStore;

    fn shift(id: &str) -> SyncEntity {
        SyncEntity::Shift(Shift::new(id, "user-1", "site-1"))
    }

    async fn queue_with(store: Arc<MemoryStore>) -> OperationQueue {
        OperationQueue::load(store, &SyncSettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_persists_immediately() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;

        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.attempts, 0);
        assert_eq!(op.max_attempts, 3);

        let blob = store.value(QUEUE_KEY).unwrap();
        assert!(blob.contains(&op.id));

        // A second process sees the same queue
        let reloaded = queue_with(store).await;
        assert_eq!(reloaded.get(&op.id).await.unwrap(), op);
    }

    #[tokio::test]
    async fn test_enqueue_survives_write_failure() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;
        store.fail_writes(true);

        let op = queue.enqueue(OperationKind::Create, shift("shift-1")).await;
        assert_eq!(queue.list_pending().await, vec![op.clone()]);
        assert!(store.value(QUEUE_KEY).is_none());

        // The next successful save carries the same operation
        store.fail_writes(false);
        queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        assert!(store.value(QUEUE_KEY).unwrap().contains(&op.id));
    }

    #[tokio::test]
    async fn test_same_entity_not_coalesced() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let a = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        let b = queue.enqueue(OperationKind::Update, shift("shift-1")).await;

        let pending: Vec<String> = queue.list_pending().await.into_iter().map(|op| op.id).collect();
        assert_eq!(pending, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_in_flight_reset_on_load() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        queue.mark_in_flight(&op.id).await.unwrap();

        let reloaded = queue_with(store).await;
        let op = reloaded.get(&op.id).await.unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.attempts, 1);
    }

    #[tokio::test]
    async fn test_interrupted_last_attempt_fails_on_load() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        for _ in 0..2 {
            queue.mark_in_flight(&op.id).await.unwrap();
            queue.mark_failed_at(&op.id, "HTTP 500", Utc::now()).await.unwrap();
        }
        // Third and last attempt, then the process dies
        let claimed = queue.mark_in_flight(&op.id).await.unwrap();
        assert_eq!(claimed.attempts, 3);

        let reloaded = queue_with(store).await;
        let op = reloaded.get(&op.id).await.unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.attempts, 3);
        assert!(reloaded.mark_in_flight(&op.id).await.is_none());
        assert_eq!(reloaded.get(&op.id).await.unwrap().attempts, 3);
        assert!(reloaded.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_pending_is_never_claimed() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;

        // Saved by an older build that left exhausted operations pending
        let mut stale = queue.get(&op.id).await.unwrap();
        stale.attempts = stale.max_attempts;
        let blob = serde_json::json!({ "operations": [stale] }).to_string();
        store.set(QUEUE_KEY, blob).await.unwrap();

        let reloaded = queue_with(store).await;
        assert!(reloaded.mark_in_flight(&op.id).await.is_none());
        let op = reloaded.get(&op.id).await.unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.attempts, op.max_attempts);
    }

    #[tokio::test]
    async fn test_requeue_interrupted_keeps_live_dispatches() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let a = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        let b = queue.enqueue(OperationKind::Update, shift("shift-2")).await;
        queue.mark_in_flight(&a.id).await.unwrap();
        queue.mark_in_flight(&b.id).await.unwrap();

        let released = queue.requeue_interrupted(|id| id == b.id).await;
        assert_eq!(released, 1);
        assert_eq!(queue.get(&a.id).await.unwrap().state, OperationState::Pending);
        assert_eq!(queue.get(&b.id).await.unwrap().state, OperationState::InFlight);
        assert_eq!(queue.current_stats().in_flight, 1);
        assert_eq!(queue.current_stats().pending, 1);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_set_aside() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUEUE_KEY, "{not json".to_string()).await.unwrap();

        let queue = queue_with(store.clone()).await;
        assert_eq!(queue.stats().await.total, 0);
        assert_eq!(store.value(CORRUPT_KEY).as_deref(), Some("{not json"));
    }

    #[tokio::test]
    async fn test_mark_in_flight_is_exclusive() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;

        let claimed = queue.mark_in_flight(&op.id).await.unwrap();
        assert_eq!(claimed.state, OperationState::InFlight);
        assert_eq!(claimed.attempts, 1);

        assert!(queue.mark_in_flight(&op.id).await.is_none());
        assert!(queue.mark_in_flight("missing").await.is_none());
        assert!(queue.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ack_is_noop() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        queue.mark_in_flight(&op.id).await.unwrap();

        assert!(queue.mark_completed(&op.id).await);
        let completed_at = queue.get(&op.id).await.unwrap().completed_at;

        assert!(!queue.mark_completed(&op.id).await);
        assert!(queue.mark_failed(&op.id, "late error").await.is_none());

        let op = queue.get(&op.id).await.unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(op.completed_at, completed_at);
    }

    #[tokio::test]
    async fn test_failure_backoff_is_linear_then_exhausted() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        let now = Utc::now();

        queue.mark_in_flight(&op.id).await.unwrap();
        let first = queue.mark_failed_at(&op.id, "HTTP 500", now).await;
        assert_eq!(first, Some(RetryDecision::RetryAfter(Duration::from_secs(5))));

        // Not due until the delay has passed
        assert!(queue.due_operations(now).await.is_empty());
        let later = now + chrono::Duration::seconds(5);
        assert_eq!(queue.due_operations(later).await.len(), 1);

        queue.mark_in_flight(&op.id).await.unwrap();
        let second = queue.mark_failed_at(&op.id, "HTTP 500", later).await;
        assert_eq!(second, Some(RetryDecision::RetryAfter(Duration::from_secs(10))));

        queue.mark_in_flight(&op.id).await.unwrap();
        let third = queue.mark_failed_at(&op.id, "HTTP 500", later).await;
        assert_eq!(third, Some(RetryDecision::Exhausted));

        let op = queue.get(&op.id).await.unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.attempts, 3);
        assert_eq!(op.last_error.as_deref(), Some("HTTP 500"));
        assert!(queue.list_pending().await.is_empty());
        assert!(queue.mark_in_flight(&op.id).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_by_state() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let a = queue.enqueue(OperationKind::Create, shift("shift-1")).await;
        queue.enqueue(OperationKind::Update, shift("shift-2")).await;
        let c = queue.enqueue(OperationKind::Update, shift("shift-3")).await;
        let d = queue.enqueue(OperationKind::Delete, shift("shift-4")).await;

        // Complete the third
        queue.mark_in_flight(&c.id).await.unwrap();
        queue.mark_completed(&c.id).await;

        // Exhaust the fourth
        for _ in 0..3 {
            queue.mark_in_flight(&d.id).await.unwrap();
            queue.mark_failed(&d.id, "boom").await;
        }

        let stats = queue.stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.oldest_pending, Some(a.enqueued_at));
        assert_eq!(queue.current_stats(), stats);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_completed() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let done = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        let failed = queue.enqueue(OperationKind::Update, shift("shift-2")).await;
        let pending = queue.enqueue(OperationKind::Update, shift("shift-3")).await;

        queue.mark_in_flight(&done.id).await.unwrap();
        queue.mark_completed(&done.id).await;
        for _ in 0..3 {
            queue.mark_in_flight(&failed.id).await.unwrap();
            queue.mark_failed(&failed.id, "boom").await;
        }

        // Nothing is older than 24h yet
        assert_eq!(queue.cleanup().await, 0);

        let cutoff = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(queue.cleanup_before(cutoff).await, 1);

        let ids: Vec<String> = queue.operations().await.into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![failed.id, pending.id]);
    }

    #[tokio::test]
    async fn test_retry_failed_rearms() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let op = queue.enqueue(OperationKind::Update, shift("shift-1")).await;
        assert!(!queue.retry_failed(&op.id).await);

        for _ in 0..3 {
            queue.mark_in_flight(&op.id).await.unwrap();
            queue.mark_failed(&op.id, "boom").await;
        }
        assert!(queue.retry_failed(&op.id).await);

        let op = queue.get(&op.id).await.unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.attempts, 0);
        assert!(queue.has_pending_for("shift-1").await);
    }

    #[tokio::test]
    async fn test_record_drain_persists_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;
        let at = Utc::now();
        queue.record_drain(at).await;

        let reloaded = queue_with(store).await;
        assert_eq!(reloaded.last_processed_at().await, Some(at));
    }
}
