//! Remote sync endpoint
//!
//! Contract between the sync core and the server API, plus the HTTP client
//! implementing it.
//!
//! ## Wire format
//!
//! - `POST <api>/sync/<entity-type>` - one queued operation
//!   (`operationId`, `deviceId`, `kind`, `entityType`, `entityId`, `payload`)
//! - `POST <api>/sync` - full-sync batch of local changes; the response may
//!   carry server-authoritative entities to merge locally
//!
//! Both endpoints must be idempotent under re-delivery: an operation whose
//! acknowledgment was lost is sent again with the same `operationId`.

mod auth;
mod http;

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityType, OperationKind, SyncEntity};
use crate::sync::SyncOperation;

pub use auth::{Credentials, StaticToken};
pub use http::HttpRemote;

/// Errors talking to the remote API
///
/// The queue processor treats every variant as a retryable failure; only
/// full sync distinguishes authentication problems.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed server response: {0}")]
    Malformed(String),

    #[error("Server rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Unauthorized(_))
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// One queued operation as sent to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation_id: String,
    pub device_id: String,
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: u32,
}

impl OperationRequest {
    pub fn new(op: &SyncOperation, device_id: &str) -> Self {
        Self {
            operation_id: op.id.clone(),
            device_id: device_id.to_string(),
            kind: op.kind,
            entity_type: op.entity_type(),
            entity_id: op.entity_id.clone(),
            payload: op.entity.payload_json(),
            enqueued_at: op.enqueued_at,
            attempt: op.attempts,
        }
    }
}

/// Server answer to a single operation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResponse {
    pub success: bool,
    /// Server-side state of the entity after applying the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            server_data: None,
            error: Some(error.into()),
        }
    }
}

/// A local change included in a full-sync batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub kind: OperationKind,
    pub entity: SyncEntity,
    pub modified_at: DateTime<Utc>,
}

/// Full-sync request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub device_id: String,
    /// Last successful full sync, `None` on first sync
    pub since: Option<DateTime<Utc>>,
    pub changes: Vec<EntityChange>,
}

/// Identifies an entity without its payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

/// Full-sync response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-authoritative entities changed since `since`
    #[serde(default)]
    pub entities: Vec<SyncEntity>,
    /// Entities deleted on the server since `since`
    #[serde(default)]
    pub deleted: Vec<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
}

impl SyncBatchResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// The server API as seen by the sync core
pub trait RemoteSync: Send + Sync {
    /// Deliver one queued operation to the sub-route of its entity type
    fn send<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, RemoteResult<RemoteResponse>>;

    /// Exchange a full-sync batch
    fn sync_batch<'a>(&'a self, batch: &'a SyncBatch) -> BoxFuture<'a, RemoteResult<SyncBatchResponse>>;
}
