//! Punchclock Core Library
//!
//! Offline synchronization engine for the Punchclock time-tracking client.
//! Shift, assignment, site and user mutations recorded on the device are kept
//! in a durable operation queue and replayed against the remote API once the
//! network is reachable.
//!
//! # Architecture
//!
//! - **Operation queue**: durable FIFO of pending mutations (source of truth
//!   for "what still needs to reach the server")
//! - **Queue processor**: timer-driven drain with linear retry backoff
//! - **Orchestrator**: full bidirectional sync, status reporting, timers
//! - **Push bridge**: turns server push events into syncs, notifications
//!   or urgent writes
//!
//! # Quick Start
//!
//! ```text
//! let engine = SyncOrchestrator::open(deps, settings, device_id).await?;
//! engine.start();
//!
//! // Record a mutation (works offline)
//! engine.enqueue(OperationKind::Update, SyncEntity::Shift(shift)).await;
//!
//! // Observe progress
//! let _sub = engine.on_sync_status_change(|status| println!("{:?}", status));
//! ```
//!
//! # Modules
//!
//! - `models`: Domain payloads (users, sites, assignments, shifts)
//! - `sync`: Operation queue, processor, orchestrator
//! - `push`: Push channel and bridge
//! - `remote`: Remote sync endpoint contract and HTTP client
//! - `network`: Reachability probes
//! - `storage`: Durable key-value stores
//! - `config`: Application configuration

pub mod config;
pub mod identity;
pub mod models;
pub mod network;
pub mod push;
pub mod remote;
pub mod storage;
pub mod sync;

pub use config::{Config, SyncConfig};
pub use identity::resolve_device_id;
pub use models::{
    Assignment, EntityError, EntityType, GeoPoint, OperationKind, Shift, Site, SyncEntity, User,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use sync::{
    OperationQueue, OperationState, QueueStats, SyncDependencies, SyncError, SyncOperation,
    SyncOrchestrator, SyncReport, SyncSettings, SyncStatus,
};
