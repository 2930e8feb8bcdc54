//! Sync orchestrator
//!
//! Entry point of the engine for the rest of the application. Owns the
//! queue, the processor, the local replica and the timers, and runs the full
//! bidirectional sync.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use super::operation::SyncOperation;
use super::processor::{DrainReport, QueueProcessor};
use super::queue::{OperationQueue, QueueStats};
use super::replica::LocalReplica;
use super::status::{StatusHub, Subscription, SyncStatus};
use super::timers::TimerRegistry;
use super::SyncSettings;
use crate::models::{EntityError, EntityType, OperationKind, SyncEntity};
use crate::network::Reachability;
use crate::remote::{Credentials, EntityRef, RemoteError, RemoteSync, SyncBatch, SyncBatchResponse};
use crate::storage::{KeyValueStore, StorageError};

/// Store key of the last successful full sync (RFC 3339)
pub const LAST_SYNC_KEY: &str = "last_sync_time";

const AUTO_SYNC_TIMER: &str = "auto-sync";
const STARTUP_SYNC_TIMER: &str = "startup-sync";
const CLEANUP_TIMER: &str = "cleanup";

/// External collaborators the engine is built from
#[derive(Clone)]
pub struct SyncDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteSync>,
    pub network: Arc<dyn Reachability>,
    pub credentials: Arc<dyn Credentials>,
}

/// Errors returned by [`SyncOrchestrator::sync`]
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("already in progress")]
    AlreadyInProgress,

    #[error("offline")]
    Offline,

    #[error("{0}")]
    Authentication(RemoteError),

    #[error("Sync request failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Server rejected sync: {0}")]
    Rejected(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of a successful [`SyncOrchestrator::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Nothing was exchanged because the last sync is still fresh
    pub up_to_date: bool,
    /// Local changes sent in the batch
    pub sent: usize,
    /// Server entities merged into the replica
    pub merged: usize,
    /// Server deletions applied
    pub removed: usize,
    /// Server changes held back by outstanding local writes
    pub conflicts: usize,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            ..Self::default()
        }
    }
}

/// Releases the full-sync slot when the sync ends or is cancelled
struct SyncSlot<'a>(&'a StatusHub);

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        self.0.end_sync();
        self.0.notify();
    }
}

/// The sync engine
pub struct SyncOrchestrator {
    deps: SyncDependencies,
    settings: SyncSettings,
    device_id: String,
    queue: Arc<OperationQueue>,
    replica: Arc<LocalReplica>,
    status: Arc<StatusHub>,
    timers: Arc<TimerRegistry>,
    processor: Arc<QueueProcessor>,
    this: Weak<SyncOrchestrator>,
}

impl SyncOrchestrator {
    /// Load persisted state and wire up the engine
    ///
    /// Nothing runs in the background until [`SyncOrchestrator::start`].
    pub async fn open(
        deps: SyncDependencies,
        settings: SyncSettings,
        device_id: impl Into<String>,
    ) -> Result<Arc<Self>, SyncError> {
        let device_id = device_id.into();
        let queue = Arc::new(OperationQueue::load(deps.store.clone(), &settings).await?);
        let replica = Arc::new(LocalReplica::load(deps.store.clone()).await?);
        let last_sync = load_last_sync(deps.store.as_ref()).await?;

        let status = Arc::new(StatusHub::new(queue.subscribe_stats(), last_sync));
        let timers = Arc::new(TimerRegistry::new());
        let processor = QueueProcessor::new(
            &deps,
            queue.clone(),
            status.clone(),
            timers.clone(),
            device_id.clone(),
            &settings,
        );

        info!(
            "Sync engine ready for device {} ({} queued operations)",
            device_id,
            queue.current_stats().total
        );

        Ok(Arc::new_cyclic(|this| Self {
            deps,
            settings,
            device_id,
            queue,
            replica,
            status,
            timers,
            processor,
            this: this.clone(),
        }))
    }

    /// Record a mutation
    ///
    /// Applied to the local replica at once and queued for delivery. Works
    /// offline and never fails.
    pub async fn enqueue(&self, kind: OperationKind, entity: SyncEntity) -> SyncOperation {
        self.replica.apply_local(kind, &entity).await;
        let op = self.queue.enqueue(kind, entity).await;
        self.status.notify();
        self.processor.kick();
        op
    }

    /// Record a mutation given as a raw JSON payload
    pub async fn enqueue_json(
        &self,
        kind: OperationKind,
        entity_type: EntityType,
        payload: serde_json::Value,
    ) -> Result<SyncOperation, EntityError> {
        let entity = SyncEntity::from_json(entity_type, payload)?;
        Ok(self.enqueue(kind, entity).await)
    }

    /// Whether a full sync is due
    pub fn needs_sync(&self) -> bool {
        self.needs_sync_at(Utc::now())
    }

    fn needs_sync_at(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.status.last_sync() else {
            return true;
        };
        match chrono::Duration::from_std(self.settings.freshness_window) {
            Ok(window) => now - last >= window,
            Err(_) => false,
        }
    }

    /// Run a full bidirectional sync
    ///
    /// Returns `Ok` without contacting the server when not forced and the last
    /// sync is still fresh. A call made while another sync runs fails at once
    /// with [`SyncError::AlreadyInProgress`]. The last sync time only moves
    /// on success.
    pub async fn sync(&self, force: bool) -> Result<SyncReport, SyncError> {
        if !force && !self.needs_sync() {
            debug!("Last sync is fresh, skipping");
            return Ok(SyncReport::up_to_date());
        }

        if !self.status.try_begin_sync() {
            debug!("Sync already in progress");
            return Err(SyncError::AlreadyInProgress);
        }
        let _slot = SyncSlot(self.status.as_ref());
        self.status.notify();

        let result = self.full_sync().await;
        match &result {
            Ok(report) => info!(
                "Sync complete: sent {}, merged {}, removed {}, held back {}",
                report.sent, report.merged, report.removed, report.conflicts
            ),
            Err(e) => warn!("Sync failed: {}", e),
        }
        result
    }

    async fn full_sync(&self) -> Result<SyncReport, SyncError> {
        let online = self.deps.network.is_reachable().await;
        self.status.set_online(online);
        if !online {
            return Err(SyncError::Offline);
        }

        let batch = SyncBatch {
            device_id: self.device_id.clone(),
            since: self.status.last_sync(),
            changes: self.replica.dirty_changes().await,
        };

        let response = match self.send_batch(&batch).await {
            Err(e) if e.is_auth() => {
                info!("Sync rejected credentials, refreshing");
                self.deps
                    .credentials
                    .refresh()
                    .await
                    .map_err(SyncError::Authentication)?;
                self.send_batch(&batch).await.map_err(|e| {
                    if e.is_auth() {
                        SyncError::Authentication(e)
                    } else {
                        SyncError::Remote(e)
                    }
                })?
            }
            other => other?,
        };

        if !response.success {
            return Err(SyncError::Rejected(
                response.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        self.replica.acknowledge(&batch.changes).await;

        let protected: HashSet<EntityRef> = self
            .queue
            .list_pending()
            .await
            .into_iter()
            .map(|op| EntityRef {
                entity_type: op.entity_type(),
                entity_id: op.entity_id,
            })
            .collect();
        let merge = self
            .replica
            .merge_server(response.entities, response.deleted, &protected)
            .await;

        let synced_at = Utc::now();
        if let Err(e) = self.deps.store.set(LAST_SYNC_KEY, synced_at.to_rfc3339()).await {
            warn!("Failed to save last sync time: {}", e);
        }
        self.status.set_last_sync(synced_at);

        Ok(SyncReport {
            up_to_date: false,
            sent: batch.changes.len(),
            merged: merge.applied,
            removed: merge.removed,
            conflicts: merge.skipped,
            synced_at: Some(synced_at),
        })
    }

    async fn send_batch(&self, batch: &SyncBatch) -> Result<SyncBatchResponse, RemoteError> {
        let timeout = self.settings.request_timeout;
        match time::timeout(timeout, self.deps.remote.sync_batch(batch)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }

    /// Current status, derived on demand
    pub fn get_sync_status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        self.queue.current_stats()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.status.last_sync()
    }

    /// Call `callback` after every queue transition and every sync
    pub fn on_sync_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.status.on_change(callback)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Re-arm a failed operation; returns `false` if it was not failed
    pub async fn retry_failed(&self, id: &str) -> bool {
        let rearmed = self.queue.retry_failed(id).await;
        if rearmed {
            self.status.notify();
            self.processor.kick();
        }
        rearmed
    }

    /// Drop completed operations past retention
    pub async fn cleanup(&self) -> usize {
        let removed = self.queue.cleanup().await;
        if removed > 0 {
            self.status.notify();
        }
        removed
    }

    /// Run one drain pass now
    pub async fn drain_now(&self) -> DrainReport {
        self.processor.drain().await
    }

    /// Ask for a drain soon (no-op unless started)
    pub fn kick(&self) {
        self.processor.kick();
    }

    /// Start background work: queue drain, periodic full sync, cleanup,
    /// and one sync right away if due
    pub fn start(&self) {
        self.processor.start();

        let this = self.this.clone();
        self.timers.schedule(STARTUP_SYNC_TIMER, std::time::Duration::ZERO, move || async move {
            if let Some(engine) = this.upgrade() {
                engine.background_sync().await;
            }
        });

        let this = self.this.clone();
        self.timers.every(AUTO_SYNC_TIMER, self.settings.auto_sync_interval, move || {
            let this = this.clone();
            async move {
                match this.upgrade() {
                    Some(engine) => {
                        engine.background_sync().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });

        let this = self.this.clone();
        self.timers.every(CLEANUP_TIMER, self.settings.cleanup_interval, move || {
            let this = this.clone();
            async move {
                match this.upgrade() {
                    Some(engine) => {
                        engine.cleanup().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });

        info!("Sync engine started");
    }

    async fn background_sync(&self) {
        match self.sync(false).await {
            Ok(_) | Err(SyncError::AlreadyInProgress) | Err(SyncError::Offline) => {}
            Err(e) => debug!("Background sync did not complete: {}", e),
        }
    }

    /// Cancel every timer; returns how many were running
    ///
    /// An operation whose send is cancelled goes back to pending, so it is
    /// sent again after the next start.
    pub fn stop_all_timers(&self) -> usize {
        self.processor.halt();
        let stopped = self.timers.stop_all();
        if self.processor.requeue_interrupted() > 0 {
            self.status.notify();
        }
        info!("Stopped {} timers", stopped);
        stopped
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.processor
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn replica(&self) -> &Arc<LocalReplica> {
        &self.replica
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

async fn load_last_sync(store: &dyn KeyValueStore) -> Result<Option<DateTime<Utc>>, StorageError> {
    let Some(raw) = store.get(LAST_SYNC_KEY).await? else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(at) => Ok(Some(at.with_timezone(&Utc))),
        Err(e) => {
            warn!("Ignoring unreadable last sync time {:?}: {}", raw, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::remote::RemoteResponse;
    use crate::sync::testing::{fast_settings, server_error, shift, Harness, MockCredentials, MockRemote};
    use crate::sync::OperationState;

    async fn engine(harness: &Harness) -> Arc<SyncOrchestrator> {
        SyncOrchestrator::open(harness.deps(), fast_settings(), "device-1")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_sync_stamps_freshness() {
        let harness = Harness::new(MockRemote::new());
        let engine = engine(&harness).await;
        assert!(engine.needs_sync());

        let report = engine.sync(false).await.unwrap();
        assert!(!report.up_to_date);
        assert!(!engine.needs_sync());
        assert!(harness.store.value(LAST_SYNC_KEY).is_some());

        // Fresh, so a non-forced sync does not hit the server
        let report = engine.sync(false).await.unwrap();
        assert!(report.up_to_date);
        assert_eq!(harness.remote.batch_count(), 1);

        // A restarted engine remembers the last sync
        let reopened = SyncOrchestrator::open(harness.deps(), fast_settings(), "device-1")
            .await
            .unwrap();
        assert!(!reopened.needs_sync());
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_needs_sync() {
        let harness = Harness::new(MockRemote::failing());
        let engine = engine(&harness).await;

        let err = engine.sync(true).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Status { status: 500, .. })));
        assert!(engine.needs_sync());
        assert!(engine.last_sync_time().is_none());
        assert!(harness.store.value(LAST_SYNC_KEY).is_none());
        assert!(!engine.get_sync_status().is_in_progress);
    }

    #[tokio::test]
    async fn test_offline_sync() {
        let harness = Harness::new(MockRemote::new());
        harness.network.set_online(false);
        let engine = engine(&harness).await;

        assert!(matches!(engine.sync(true).await, Err(SyncError::Offline)));
        assert_eq!(harness.remote.batch_count(), 0);
        assert!(!engine.get_sync_status().is_online);
    }

    #[tokio::test]
    async fn test_sync_is_single_flight() {
        let remote = MockRemote::new();
        let gate = remote.install_gate();
        let harness = Harness::new(remote);
        let engine = engine(&harness).await;

        let running = engine.clone();
        let first = tokio::spawn(async move { running.sync(true).await });
        harness.remote.entered.notified().await;
        assert!(engine.get_sync_status().is_in_progress);

        let second = engine.sync(true).await.unwrap_err();
        assert!(matches!(second, SyncError::AlreadyInProgress));
        assert_eq!(second.to_string(), "already in progress");

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(harness.remote.batch_count(), 1);
        assert!(!engine.get_sync_status().is_in_progress);
    }

    #[tokio::test]
    async fn test_sync_sends_local_changes_once() {
        let harness = Harness::new(MockRemote::new());
        let engine = engine(&harness).await;
        engine.enqueue(OperationKind::Create, shift("shift-1")).await;

        let report = engine.sync(true).await.unwrap();
        assert_eq!(report.sent, 1);

        let batch = &harness.remote.batches()[0];
        assert_eq!(batch.device_id, "device-1");
        assert!(batch.since.is_none());
        assert_eq!(batch.changes[0].entity.entity_id(), "shift-1");

        engine.sync(true).await.unwrap();
        let batch = &harness.remote.batches()[1];
        assert!(batch.changes.is_empty());
        assert!(batch.since.is_some());
    }

    #[tokio::test]
    async fn test_server_entities_do_not_override_queued_writes() {
        let harness = Harness::new(MockRemote::new());
        let engine = engine(&harness).await;

        // Queued but not yet delivered; the replica entry is acknowledged by
        // the first sync, the queue entry is not
        engine.enqueue(OperationKind::Update, shift("mine")).await;
        engine.sync(true).await.unwrap();

        let server_copy = crate::models::Shift::new("mine", "user-1", "other-site");
        harness.remote.push_batch(Ok(SyncBatchResponse {
            entities: vec![SyncEntity::Shift(server_copy), shift("theirs")],
            ..SyncBatchResponse::ok()
        }));

        let report = engine.sync(true).await.unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(report.conflicts, 1);

        let Some(SyncEntity::Shift(local)) = engine.replica().get(EntityType::Shift, "mine").await else {
            panic!("local shift missing");
        };
        assert_eq!(local.site_id, "site-1");
        assert!(engine.replica().get(EntityType::Shift, "theirs").await.is_some());
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_once() {
        let remote = MockRemote::new();
        remote.push_batch(Err(RemoteError::Unauthorized("expired".to_string())));
        let mut harness = Harness::new(remote);
        harness.credentials = Arc::new(MockCredentials::new(true));
        let engine = engine(&harness).await;

        engine.sync(true).await.unwrap();
        assert_eq!(harness.credentials.refresh_count(), 1);
        assert_eq!(harness.remote.batch_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_when_refresh_fails() {
        let remote = MockRemote::new();
        remote.set_batch_fallback(Err(RemoteError::Unauthorized("expired".to_string())));
        let harness = Harness::new(remote);
        let engine = engine(&harness).await;

        let err = engine.sync(true).await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
        assert_eq!(harness.credentials.refresh_count(), 1);
        assert_eq!(harness.remote.batch_count(), 1);
        assert!(engine.needs_sync());
    }

    #[tokio::test]
    async fn test_rejected_batch_is_an_error() {
        let remote = MockRemote::new();
        remote.push_batch(Ok(SyncBatchResponse {
            success: false,
            error: Some("schema mismatch".to_string()),
            ..SyncBatchResponse::default()
        }));
        let harness = Harness::new(remote);
        let engine = engine(&harness).await;

        let err = engine.sync(true).await.unwrap_err();
        assert_eq!(err.to_string(), "Server rejected sync: schema mismatch");
        assert!(engine.needs_sync());
    }

    #[tokio::test]
    async fn test_status_callbacks() {
        let harness = Harness::new(MockRemote::new());
        let engine = engine(&harness).await;
        let seen: Arc<Mutex<Vec<SyncStatus>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let sub = engine.on_sync_status_change(move |status| {
            sink.lock().unwrap().push(status.clone());
        });

        engine.enqueue(OperationKind::Update, shift("shift-1")).await;
        engine.sync(true).await.unwrap();

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[0].pending_operations, 1);
            assert!(seen.iter().any(|s| s.is_in_progress));
            let last = seen.last().unwrap();
            assert!(!last.is_in_progress);
            assert!(last.last_sync_time.is_some());
        }

        sub.unsubscribe();
        let count = seen.lock().unwrap().len();
        engine.enqueue(OperationKind::Update, shift("shift-2")).await;
        assert_eq!(seen.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_queue_stats_by_state() {
        let remote = MockRemote::new();
        remote.push_send(Ok(RemoteResponse::ok()));
        remote.set_send_fallback(Err(server_error()));
        let harness = Harness::new(remote);
        let engine = engine(&harness).await;

        engine.enqueue(OperationKind::Create, shift("shift-1")).await;
        engine.enqueue(OperationKind::Create, shift("shift-2")).await;
        let done = engine.enqueue(OperationKind::Update, shift("shift-3")).await;
        let doomed = engine.enqueue(OperationKind::Delete, shift("shift-4")).await;

        engine.processor().dispatch(&done.id).await;
        for _ in 0..3 {
            engine.processor().dispatch(&doomed.id).await;
        }

        let stats = engine.get_queue_stats();
        assert_eq!((stats.total, stats.pending, stats.completed, stats.failed), (4, 2, 1, 1));

        let status = engine.get_sync_status();
        assert_eq!(status.pending_operations, 2);
        assert_eq!(status.failed_operations, 1);

        assert!(engine.retry_failed(&doomed.id).await);
        assert_eq!(engine.get_queue_stats().failed, 0);
    }

    #[tokio::test]
    async fn test_started_engine_drains_after_enqueue() {
        let harness = Harness::new(MockRemote::new());
        let engine = engine(&harness).await;
        engine.start();

        let op = engine.enqueue(OperationKind::Update, shift("shift-1")).await;
        time::timeout(Duration::from_secs(2), async {
            while engine.queue().get(&op.id).await.unwrap().state != OperationState::Completed {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(engine.timers().active_count() > 0);
        engine.stop_all_timers();
        assert_eq!(engine.timers().active_count(), 0);

        // Stopped: enqueue no longer schedules a drain
        engine.enqueue(OperationKind::Update, shift("shift-2")).await;
        assert_eq!(engine.timers().active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_mid_send_requeues_for_restart() {
        let remote = MockRemote::new();
        let _gate = remote.install_gate();
        let harness = Harness::new(remote);
        // Fresh last sync, so only the drain talks to the remote
        harness
            .store
            .set(LAST_SYNC_KEY, Utc::now().to_rfc3339())
            .await
            .unwrap();
        let engine = engine(&harness).await;
        engine.start();

        let op = engine.enqueue(OperationKind::Update, shift("shift-1")).await;
        harness.remote.entered.notified().await;
        assert_eq!(engine.get_queue_stats().in_flight, 1);

        engine.stop_all_timers();
        let stats = engine.get_queue_stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.pending, 1);
        assert_eq!(engine.get_sync_status().pending_operations, 1);
        assert_eq!(
            engine.queue().get(&op.id).await.unwrap().state,
            OperationState::Pending
        );

        harness.remote.remove_gate();
        engine.start();
        time::timeout(Duration::from_secs(2), async {
            while engine.queue().get(&op.id).await.unwrap().state != OperationState::Completed {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(engine.queue().get(&op.id).await.unwrap().attempts, 2);
        assert_eq!(harness.remote.send_count(), 2);
        assert_eq!(engine.get_queue_stats().in_flight, 0);
        engine.stop_all_timers();
    }

    #[tokio::test]
    async fn test_enqueue_json_validates_payload() {
        let harness = Harness::new(MockRemote::new());
        let engine = engine(&harness).await;

        let err = engine
            .enqueue_json(OperationKind::Create, EntityType::Site, serde_json::json!({"id": 1}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("site"));

        let op = engine
            .enqueue_json(
                OperationKind::Create,
                EntityType::User,
                serde_json::json!({"id": "u-1", "name": "Ana", "updatedAt": Utc::now()}),
            )
            .await
            .unwrap();
        assert_eq!(op.entity_id, "u-1");
    }
}
