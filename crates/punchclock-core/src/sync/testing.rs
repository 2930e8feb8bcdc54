//! Scripted collaborators for engine tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Notify;

use super::{SyncDependencies, SyncSettings};
use crate::models::{Shift, SyncEntity};
use crate::network::ManualReachability;
use crate::remote::{
    Credentials, OperationRequest, RemoteError, RemoteResponse, RemoteResult, RemoteSync, SyncBatch,
    SyncBatchResponse,
};
use crate::storage::MemoryStore;

/// Remote endpoint answering from a script
///
/// Scripted results are used first, in order; afterwards every call gets the
/// fallback (success unless changed).
pub(crate) struct MockRemote {
    send_script: Mutex<VecDeque<RemoteResult<RemoteResponse>>>,
    send_fallback: Mutex<RemoteResult<RemoteResponse>>,
    batch_script: Mutex<VecDeque<RemoteResult<SyncBatchResponse>>>,
    batch_fallback: Mutex<RemoteResult<SyncBatchResponse>>,
    sent: Mutex<Vec<OperationRequest>>,
    batches: Mutex<Vec<SyncBatch>>,
    gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled whenever a call reaches the mock
    pub entered: Notify,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            send_script: Mutex::new(VecDeque::new()),
            send_fallback: Mutex::new(Ok(RemoteResponse::ok())),
            batch_script: Mutex::new(VecDeque::new()),
            batch_fallback: Mutex::new(Ok(SyncBatchResponse::ok())),
            sent: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            entered: Notify::new(),
        }
    }

    /// Every call fails with a server error
    pub fn failing() -> Self {
        let remote = Self::new();
        remote.set_send_fallback(Err(server_error()));
        remote.set_batch_fallback(Err(server_error()));
        remote
    }

    pub fn push_send(&self, result: RemoteResult<RemoteResponse>) {
        self.send_script.lock().unwrap().push_back(result);
    }

    pub fn set_send_fallback(&self, result: RemoteResult<RemoteResponse>) {
        *self.send_fallback.lock().unwrap() = result;
    }

    pub fn push_batch(&self, result: RemoteResult<SyncBatchResponse>) {
        self.batch_script.lock().unwrap().push_back(result);
    }

    pub fn set_batch_fallback(&self, result: RemoteResult<SyncBatchResponse>) {
        *self.batch_fallback.lock().unwrap() = result;
    }

    /// Hold every subsequent call until the returned gate is notified
    pub fn install_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Let calls through again; calls already held stay held
    pub fn remove_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn sent(&self) -> Vec<OperationRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn batches(&self) -> Vec<SyncBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

impl RemoteSync for MockRemote {
    fn send<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, RemoteResult<RemoteResponse>> {
        async move {
            self.sent.lock().unwrap().push(request.clone());
            self.entered.notify_one();
            self.wait_gate().await;

            let scripted = self.send_script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| self.send_fallback.lock().unwrap().clone())
        }
        .boxed()
    }

    fn sync_batch<'a>(&'a self, batch: &'a SyncBatch) -> BoxFuture<'a, RemoteResult<SyncBatchResponse>> {
        async move {
            self.batches.lock().unwrap().push(batch.clone());
            self.entered.notify_one();
            self.wait_gate().await;

            let scripted = self.batch_script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| self.batch_fallback.lock().unwrap().clone())
        }
        .boxed()
    }
}

/// Credentials that count refresh requests
pub(crate) struct MockCredentials {
    refreshes: AtomicUsize,
    refresh_succeeds: AtomicBool,
}

impl MockCredentials {
    pub fn new(refresh_succeeds: bool) -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
            refresh_succeeds: AtomicBool::new(refresh_succeeds),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Credentials for MockCredentials {
    fn bearer_token(&self) -> Option<String> {
        Some("test-token".to_string())
    }

    fn refresh(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let ok = self.refresh_succeeds.load(Ordering::SeqCst);
        async move {
            if ok {
                Ok(())
            } else {
                Err(RemoteError::Unauthorized("refresh denied".to_string()))
            }
        }
        .boxed()
    }
}

/// Everything a test engine is wired from, kept for assertions
pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub remote: Arc<MockRemote>,
    pub network: Arc<ManualReachability>,
    pub credentials: Arc<MockCredentials>,
}

impl Harness {
    pub fn new(remote: MockRemote) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            remote: Arc::new(remote),
            network: Arc::new(ManualReachability::new(true)),
            credentials: Arc::new(MockCredentials::new(false)),
        }
    }

    pub fn deps(&self) -> SyncDependencies {
        SyncDependencies {
            store: self.store.clone(),
            remote: self.remote.clone(),
            network: self.network.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Settings with no backoff, so retried operations are due immediately
pub(crate) fn fast_settings() -> SyncSettings {
    SyncSettings {
        retry_base_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        ..SyncSettings::default()
    }
}

pub(crate) fn shift(id: &str) -> SyncEntity {
    SyncEntity::Shift(Shift::new(id, "user-1", "site-1"))
}

pub(crate) fn server_error() -> RemoteError {
    RemoteError::Status {
        status: 500,
        message: "internal error".to_string(),
    }
}
