//! WebSocket push channel
//!
//! A background task holds the connection and reconnects on its own with
//! exponential backoff, giving up after a bounded number of consecutive
//! failed attempts. Frames go out through a command channel so callers never
//! touch the socket.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::{PushChannel, PushEnvelope, PushError, PushEvent};

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never started or disconnected on request
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and listening
    Connected,
    /// Waiting before the given attempt
    Reconnecting { attempt: u32 },
    /// Gave up after too many failed attempts
    Stopped,
}

/// Configuration of the WebSocket channel
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,
    /// Bearer token sent in the upgrade request
    pub token: Option<String>,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl PushConfig {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            ..Self::default()
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Commands sent to the connection task
#[derive(Debug)]
enum PushCommand {
    Send {
        frame: String,
        ack: oneshot::Sender<Result<(), PushError>>,
    },
    Shutdown,
}

/// How a connected session ended
enum SessionEnd {
    Shutdown,
    Dropped,
}

/// Push channel over a WebSocket
pub struct WebSocketPushChannel {
    config: PushConfig,
    events_tx: broadcast::Sender<PushEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    command_tx: Mutex<Option<mpsc::Sender<PushCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketPushChannel {
    pub fn new(config: PushConfig) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            events_tx,
            status_tx,
            command_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Watch the connection status
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Spawn the connection task unless one is running
    fn ensure_task(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let (command_tx, command_rx) = mpsc::channel(16);
        self.status_tx.send_replace(ConnectionStatus::Connecting);
        *task = Some(tokio::spawn(connection_loop(
            self.config.clone(),
            command_rx,
            self.events_tx.clone(),
            self.status_tx.clone(),
        )));
        *self
            .command_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(command_tx);
    }

    fn command_sender(&self) -> Option<mpsc::Sender<PushCommand>> {
        self.command_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PushChannel for WebSocketPushChannel {
    fn connect(&self) -> BoxFuture<'_, bool> {
        async move {
            self.ensure_task();
            let mut status = self.status_tx.subscribe();
            let settled = async {
                loop {
                    let current = *status.borrow_and_update();
                    if !matches!(current, ConnectionStatus::Connecting | ConnectionStatus::Disconnected) {
                        return current == ConnectionStatus::Connected;
                    }
                    if status.changed().await.is_err() {
                        return false;
                    }
                }
            };
            time::timeout(self.config.connect_timeout, settled)
                .await
                .unwrap_or(false)
        }
        .boxed()
    }

    fn events(&self) -> broadcast::Receiver<PushEvent> {
        self.events_tx.subscribe()
    }

    fn send<'a>(&'a self, event: &'a str, data: &'a serde_json::Value) -> BoxFuture<'a, Result<(), PushError>> {
        async move {
            if !self.is_connected() {
                return Err(PushError::NotConnected);
            }
            let envelope = PushEnvelope {
                event: event.to_string(),
                data: data.clone(),
            };
            let frame = serde_json::to_string(&envelope).map_err(|e| PushError::Encode(e.to_string()))?;

            let command_tx = self.command_sender().ok_or(PushError::NotConnected)?;
            let (ack, ack_rx) = oneshot::channel();
            command_tx
                .send(PushCommand::Send { frame, ack })
                .await
                .map_err(|_| PushError::NotConnected)?;
            ack_rx.await.map_err(|_| PushError::NotConnected)?
        }
        .boxed()
    }

    fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        async move {
            let command_tx = self
                .command_tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(tx) = command_tx {
                let _ = tx.send(PushCommand::Shutdown).await;
            }

            let task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
            if let Some(mut handle) = task {
                if time::timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                    handle.abort();
                }
            }
            self.status_tx.send_replace(ConnectionStatus::Disconnected);
        }
        .boxed()
    }
}

impl Drop for WebSocketPushChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take() {
            handle.abort();
        }
    }
}

/// Connection task with reconnection
async fn connection_loop(
    config: PushConfig,
    mut command_rx: mpsc::Receiver<PushCommand>,
    events_tx: broadcast::Sender<PushEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;
    let mut failures = 0u32;

    loop {
        status_tx.send_replace(ConnectionStatus::Connecting);

        match connect_and_listen(&config, &mut command_rx, &events_tx, &status_tx).await {
            Ok(SessionEnd::Shutdown) => {
                let _ = events_tx.send(PushEvent::Disconnected);
                break;
            }
            Ok(SessionEnd::Dropped) => {
                info!("Push connection lost, reconnecting");
                let _ = events_tx.send(PushEvent::Disconnected);
                reconnect_delay = config.initial_reconnect_delay;
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Push connection attempt {}/{} failed: {}",
                    failures, config.max_reconnect_attempts, e
                );
            }
        }

        if failures >= config.max_reconnect_attempts {
            warn!("Giving up on push channel; sync continues by polling");
            status_tx.send_replace(ConnectionStatus::Stopped);
            return;
        }

        status_tx.send_replace(ConnectionStatus::Reconnecting {
            attempt: failures + 1,
        });
        if wait_or_shutdown(&mut command_rx, reconnect_delay).await {
            break;
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
    }

    status_tx.send_replace(ConnectionStatus::Disconnected);
    debug!("Push connection task finished");
}

/// Sleep before the next attempt; `true` if shutdown was requested meanwhile
async fn wait_or_shutdown(command_rx: &mut mpsc::Receiver<PushCommand>, delay: Duration) -> bool {
    let wake = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = time::sleep_until(wake) => return false,
            cmd = command_rx.recv() => match cmd {
                Some(PushCommand::Send { ack, .. }) => {
                    let _ = ack.send(Err(PushError::NotConnected));
                }
                Some(PushCommand::Shutdown) | None => return true,
            },
        }
    }
}

/// Connect and relay frames until the session ends
///
/// Errors only for failures to establish the connection.
async fn connect_and_listen(
    config: &PushConfig,
    command_rx: &mut mpsc::Receiver<PushCommand>,
    events_tx: &broadcast::Sender<PushEvent>,
    status_tx: &watch::Sender<ConnectionStatus>,
) -> Result<SessionEnd, PushError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| PushError::Connect(e.to_string()))?;
    if let Some(ref token) = config.token {
        let value = format!("Bearer {}", token)
            .parse()
            .map_err(|_| PushError::Connect("API token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws, _) = time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| PushError::Connect("timed out".to_string()))?
        .map_err(|e| PushError::Connect(e.to_string()))?;
    let (mut write, mut read) = ws.split();

    info!("Push channel connected to {}", config.url);
    status_tx.send_replace(ConnectionStatus::Connected);
    let _ = events_tx.send(PushEvent::Connected);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(PushCommand::Send { frame, ack }) => {
                    let result = write
                        .send(Message::Text(frame))
                        .await
                        .map_err(|e| PushError::Closed(e.to_string()));
                    let failed = result.is_err();
                    let _ = ack.send(result);
                    if failed {
                        return Ok(SessionEnd::Dropped);
                    }
                }
                Some(PushCommand::Shutdown) | None => {
                    write.close().await.ok();
                    return Ok(SessionEnd::Shutdown);
                }
            },

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<PushEnvelope>(&text) {
                    Ok(envelope) => {
                        debug!("Push event {}", envelope.event);
                        let _ = events_tx.send(PushEvent::Message {
                            event: envelope.event,
                            data: envelope.data,
                        });
                    }
                    Err(e) => debug!("Ignoring malformed push frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                Some(Err(e)) => {
                    warn!("Push connection error: {}", e);
                    return Ok(SessionEnd::Dropped);
                }
                _ => {}
            },
        }
    }
}
