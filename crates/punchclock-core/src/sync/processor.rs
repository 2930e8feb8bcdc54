//! Queue processor
//!
//! Drains retry-eligible operations against the remote API. A drain pass:
//!
//! 1. Returns at once if another pass is running
//! 2. Returns at once while offline, touching nothing
//! 3. Snapshots the due operations and dispatches them one by one, in
//!    enqueue order
//! 4. Stamps `last_processed_at` once at the end
//!
//! Each [`start`](QueueProcessor::start) after a halt is a new run. Passes
//! and dispatches belong to the run they began in; once their run is halted
//! they no longer block the next one, and an operation they left in flight is
//! re-queued by the next pass.
//!
//! Every failure kind (network, HTTP status, rejected or malformed response,
//! timeout, auth) counts as a failed attempt. A failure never escapes the
//! pass; it only moves its operation to retry or failed.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{debug, info, warn};

use super::orchestrator::SyncDependencies;
use super::queue::{OperationQueue, RetryDecision};
use super::status::StatusHub;
use super::timers::TimerRegistry;
use super::SyncSettings;
use crate::network::Reachability;
use crate::remote::{Credentials, OperationRequest, RemoteError, RemoteResponse, RemoteSync};

/// Timer name of the periodic drain
pub const DRAIN_TIMER: &str = "queue-drain";

/// Timer name of the drain kicked after an enqueue
pub const KICK_TIMER: &str = "enqueue-drain";

/// Why a drain pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDraining,
    Offline,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: Option<SkipReason>,
    pub dispatched: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Result of dispatching one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not dispatched: unknown, in flight, completed or exhausted
    Skipped,
    Completed,
    /// Failed, back to pending after the delay
    Retry(Duration),
    /// Failed with no attempts left
    Failed,
}

/// Releases the drain flag when the pass ends, however it ends
///
/// The flag holds the run of the pass owning it, or 0 when idle. A pass left
/// over from a halted run is overtaken, and its late release leaves the new
/// owner alone.
struct DrainGuard<'a> {
    flag: &'a AtomicU64,
    run: u64,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicU64, run: u64) -> Option<Self> {
        let mut current = flag.load(Ordering::SeqCst);
        loop {
            if current >= run {
                return None;
            }
            match flag.compare_exchange(current, run, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(DrainGuard { flag, run }),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .flag
            .compare_exchange(self.run, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Marks an operation as being sent by the current run until dropped
struct Claim<'a> {
    claims: &'a Mutex<HashMap<String, u64>>,
    id: String,
    run: u64,
}

impl<'a> Claim<'a> {
    fn acquire(claims: &'a Mutex<HashMap<String, u64>>, id: &str, run: u64) -> Option<Self> {
        let mut held = claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if held.get(id) == Some(&run) {
            return None;
        }
        held.insert(id.to_string(), run);
        Some(Claim {
            claims,
            id: id.to_string(),
            run,
        })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut held = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if held.get(&self.id) == Some(&self.run) {
            held.remove(&self.id);
        }
    }
}

/// Timer-driven queue drain
pub struct QueueProcessor {
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteSync>,
    network: Arc<dyn Reachability>,
    credentials: Arc<dyn Credentials>,
    status: Arc<StatusHub>,
    timers: Arc<TimerRegistry>,
    device_id: String,
    drain_interval: Duration,
    request_timeout: Duration,
    /// Current run, bumped by every halt
    run: AtomicU64,
    draining: AtomicU64,
    /// Operation id to the run whose dispatch is sending it
    claims: Mutex<HashMap<String, u64>>,
    needs_refresh: AtomicBool,
    started: AtomicBool,
    this: Weak<QueueProcessor>,
}

impl QueueProcessor {
    pub fn new(
        deps: &SyncDependencies,
        queue: Arc<OperationQueue>,
        status: Arc<StatusHub>,
        timers: Arc<TimerRegistry>,
        device_id: String,
        settings: &SyncSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            queue,
            remote: deps.remote.clone(),
            network: deps.network.clone(),
            credentials: deps.credentials.clone(),
            status,
            timers,
            device_id,
            drain_interval: settings.drain_interval,
            request_timeout: settings.request_timeout,
            run: AtomicU64::new(1),
            draining: AtomicU64::new(0),
            claims: Mutex::new(HashMap::new()),
            needs_refresh: AtomicBool::new(false),
            started: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst) == self.current_run()
    }

    fn current_run(&self) -> u64 {
        self.run.load(Ordering::SeqCst)
    }

    /// Whether a dispatch of the current run is sending `id`
    fn is_sending(&self, id: &str) -> bool {
        let run = self.current_run();
        self.claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            == Some(&run)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run one drain pass
    pub async fn drain(&self) -> DrainReport {
        let Some(_guard) = DrainGuard::acquire(&self.draining, self.current_run()) else {
            debug!("Drain already running, skipping");
            return DrainReport::skipped(SkipReason::AlreadyDraining);
        };

        let online = self.network.is_reachable().await;
        self.update_online(online);
        if !online {
            debug!("Offline, skipping drain");
            return DrainReport::skipped(SkipReason::Offline);
        }

        if self.needs_refresh.swap(false, Ordering::SeqCst) {
            match self.credentials.refresh().await {
                Ok(()) => info!("Refreshed credentials after authentication failure"),
                Err(e) => warn!("Credential refresh failed: {}", e),
            }
        }

        self.queue.requeue_interrupted(|id| self.is_sending(id)).await;

        let mut report = DrainReport::default();
        for op in self.queue.due_operations(Utc::now()).await {
            match self.dispatch(&op.id).await {
                DispatchOutcome::Skipped => continue,
                DispatchOutcome::Completed => report.completed += 1,
                DispatchOutcome::Retry(_) => report.retried += 1,
                DispatchOutcome::Failed => report.failed += 1,
            }
            report.dispatched += 1;
        }

        self.queue.record_drain(Utc::now()).await;
        if report.dispatched > 0 {
            info!(
                "Drained {} operations: {} completed, {} to retry, {} failed",
                report.dispatched, report.completed, report.retried, report.failed
            );
        }
        report
    }

    /// Send one operation and record the outcome
    ///
    /// Operations already in flight or completed are not sent again, so
    /// replaying an acknowledged operation is a no-op.
    pub async fn dispatch(&self, id: &str) -> DispatchOutcome {
        let Some(_claim) = Claim::acquire(&self.claims, id, self.current_run()) else {
            return DispatchOutcome::Skipped;
        };
        let Some(op) = self.queue.mark_in_flight(id).await else {
            return DispatchOutcome::Skipped;
        };
        self.status.notify();

        let request = OperationRequest::new(&op, &self.device_id);
        debug!(
            "Dispatching {} {} {} (attempt {}/{})",
            op.kind,
            op.entity_type(),
            op.entity_id,
            op.attempts,
            op.max_attempts
        );

        let outcome = match self.send(&request).await {
            Ok(_) => {
                self.queue.mark_completed(id).await;
                debug!("Operation {} completed", id);
                DispatchOutcome::Completed
            }
            Err(e) => {
                if e.is_auth() {
                    self.needs_refresh.store(true, Ordering::SeqCst);
                }
                match self.queue.mark_failed_at(id, &e.to_string(), Utc::now()).await {
                    Some(RetryDecision::RetryAfter(delay)) => {
                        warn!("Operation {} failed, retrying in {:?}: {}", id, delay, e);
                        self.schedule_retry(id, delay);
                        DispatchOutcome::Retry(delay)
                    }
                    Some(RetryDecision::Exhausted) => {
                        warn!(
                            "Operation {} failed after {} attempts: {}",
                            id, op.max_attempts, e
                        );
                        DispatchOutcome::Failed
                    }
                    None => DispatchOutcome::Skipped,
                }
            }
        };

        self.status.notify();
        outcome
    }

    async fn send(&self, request: &OperationRequest) -> Result<RemoteResponse, RemoteError> {
        match time::timeout(self.request_timeout, self.remote.send(request)).await {
            Ok(Ok(response)) if response.success => Ok(response),
            Ok(Ok(response)) => Err(RemoteError::Rejected(
                response.error.unwrap_or_else(|| "no reason given".to_string()),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RemoteError::Timeout(self.request_timeout)),
        }
    }

    /// Start the periodic drain
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = self.this.clone();
        self.timers.every(DRAIN_TIMER, self.drain_interval, move || {
            let this = this.clone();
            async move {
                match this.upgrade() {
                    Some(processor) => {
                        processor.drain().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
        debug!("Queue processor started, draining every {:?}", self.drain_interval);
    }

    /// Stop scheduling new drains and end the current run; running timers
    /// are cancelled by the registry
    pub(crate) fn halt(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.run.fetch_add(1, Ordering::SeqCst);
    }

    /// Return operations left in flight by a halted run to the queue
    ///
    /// Does not wait: when the queue is busy the next drain pass does it.
    pub(crate) fn requeue_interrupted(&self) -> usize {
        match self.queue.try_requeue_interrupted(|id| self.is_sending(id)) {
            Some(released) => released,
            None => {
                debug!("Queue busy, leaving interrupted operations to the next drain");
                0
            }
        }
    }

    /// Drain soon, after an enqueue; does nothing unless started
    pub fn kick(&self) {
        if self.is_started() {
            self.schedule_drain(KICK_TIMER, Duration::ZERO);
        }
    }

    fn schedule_retry(&self, id: &str, delay: Duration) {
        if self.is_started() {
            self.schedule_drain(&format!("retry:{}", id), delay);
        }
    }

    fn schedule_drain(&self, name: &str, delay: Duration) {
        let this = self.this.clone();
        self.timers.schedule(name, delay, move || async move {
            if let Some(processor) = this.upgrade() {
                processor.drain().await;
            }
        });
    }

    fn update_online(&self, online: bool) {
        if self.status.snapshot().is_online != online {
            info!("Network is {}", if online { "reachable" } else { "unreachable" });
            self.status.set_online(online);
            self.status.notify();
        }
    }
}
