//! Server push
//!
//! A push channel delivers server-initiated events over a long-lived
//! connection and carries small client notices back. It is best-effort: the
//! engine keeps syncing by polling when no channel is available.
//!
//! ## Frame format
//!
//! Every frame is a JSON text message:
//!
//! ```text
//! {"event": "sync:required", "data": {...}}
//! ```

mod bridge;
mod notify;
mod websocket;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use bridge::{BridgeAction, PushBridge, BRIDGE_TIMER};
pub use notify::{LocalNotification, Notifier, TracingNotifier};
pub use websocket::{ConnectionStatus, PushConfig, WebSocketPushChannel};

/// Something that happened on the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    Message {
        event: String,
        data: serde_json::Value,
    },
}

/// Errors sending on the push channel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushError {
    #[error("Push channel is not connected")]
    NotConnected,

    #[error("Push connection failed: {0}")]
    Connect(String),

    #[error("Push connection closed: {0}")]
    Closed(String),

    #[error("Failed to encode push frame: {0}")]
    Encode(String),
}

/// Wire envelope of a push frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A bidirectional real-time channel
///
/// Implementations own their reconnection. Consumers subscribe to
/// [`PushChannel::events`] and must tolerate the channel never connecting.
pub trait PushChannel: Send + Sync {
    /// Start connecting; resolves to whether the first attempt succeeded
    fn connect(&self) -> BoxFuture<'_, bool>;

    /// Subscribe to channel events
    fn events(&self) -> broadcast::Receiver<PushEvent>;

    /// Send a client notice
    fn send<'a>(&'a self, event: &'a str, data: &'a serde_json::Value) -> BoxFuture<'a, Result<(), PushError>>;

    fn is_connected(&self) -> bool;

    /// Close the connection and stop reconnecting
    fn disconnect(&self) -> BoxFuture<'_, ()>;
}
