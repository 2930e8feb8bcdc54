//! Push bridge
//!
//! Translates push events into engine actions:
//!
//! | Event                                         | Action               |
//! |-----------------------------------------------|----------------------|
//! | `sync:required`, `entity:changed`,            | forced full sync     |
//! | `assignment:created`, `assignment:updated`,   |                      |
//! | `shift:updated`                               |                      |
//! | `notification`, `chat:message`               | local notification   |
//! | `shift:start_requested`                       | enqueue acknowledged |
//! |                                               | shift, notify server |
//! | connected                                     | queue drain          |
//!
//! Anything else is ignored.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{LocalNotification, Notifier, PushChannel, PushEvent};
use crate::models::{EntityType, OperationKind, Shift, SyncEntity};
use crate::sync::{SyncError, SyncOrchestrator};

/// Timer name of the bridge task
pub const BRIDGE_TIMER: &str = "push-bridge";

const SYNC_EVENTS: &[&str] = &[
    "sync:required",
    "entity:changed",
    "assignment:created",
    "assignment:updated",
    "shift:updated",
];

const NOTIFY_EVENTS: &[&str] = &["notification", "chat:message"];

const SHIFT_START_EVENT: &str = "shift:start_requested";
const SHIFT_ACK_EVENT: &str = "shift:acknowledged";

/// What the bridge did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeAction {
    Synced,
    Notified,
    /// Urgent write queued, with its operation id
    Enqueued(String),
    Drained,
    Ignored,
}

/// Connects a push channel to the engine
pub struct PushBridge {
    engine: Arc<SyncOrchestrator>,
    channel: Arc<dyn PushChannel>,
    notifier: Arc<dyn Notifier>,
}

impl PushBridge {
    pub fn new(
        engine: Arc<SyncOrchestrator>,
        channel: Arc<dyn PushChannel>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            channel,
            notifier,
        }
    }

    /// Run the bridge in the engine's timer registry
    ///
    /// Stopped by [`SyncOrchestrator::stop_all_timers`]. Returns `false` if
    /// a bridge is already running.
    pub fn start(self: Arc<Self>) -> bool {
        let timers = self.engine.timers().clone();
        let handle = tokio::spawn(async move { self.run().await });
        timers.track(BRIDGE_TIMER, handle)
    }

    /// Connect and handle events until the channel goes away
    pub async fn run(&self) {
        // Subscribe first so the connected event is not missed
        let mut events = self.channel.events();
        if !self.channel.connect().await {
            warn!("Push channel unavailable; sync continues by polling");
        }

        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle(event).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} push events, forcing a full sync", missed);
                    self.forced_sync().await;
                }
                Err(RecvError::Closed) => {
                    debug!("Push channel closed");
                    break;
                }
            }
        }
    }

    /// Act on one event
    pub async fn handle(&self, event: PushEvent) -> BridgeAction {
        match event {
            PushEvent::Connected => {
                self.engine.kick();
                BridgeAction::Drained
            }
            PushEvent::Disconnected => {
                debug!("Push channel disconnected");
                BridgeAction::Ignored
            }
            PushEvent::Message { event, data } => {
                let name = event.as_str();
                if SYNC_EVENTS.contains(&name) {
                    debug!("Push event {} requests a sync", name);
                    self.forced_sync().await;
                    BridgeAction::Synced
                } else if NOTIFY_EVENTS.contains(&name) {
                    self.notifier.notify(LocalNotification::from_event(name, &data));
                    BridgeAction::Notified
                } else if name == SHIFT_START_EVENT {
                    self.acknowledge_shift_start(&data).await
                } else {
                    debug!("Ignoring push event {}", name);
                    BridgeAction::Ignored
                }
            }
        }
    }

    async fn forced_sync(&self) {
        match self.engine.sync(true).await {
            Ok(_) => {}
            Err(SyncError::AlreadyInProgress) => debug!("Sync already running"),
            Err(e) => warn!("Push-triggered sync failed: {}", e),
        }
    }

    /// Queue an acknowledged shift and tell the server, best-effort
    ///
    /// The payload carries either the full shift (`{"shift": {...}}`) or its
    /// id (`{"shiftId": "..."}`), in which case the cached copy is used.
    async fn acknowledge_shift_start(&self, data: &serde_json::Value) -> BridgeAction {
        let Some(mut shift) = self.resolve_shift(data).await else {
            warn!("Ignoring {} for an unknown shift: {}", SHIFT_START_EVENT, data);
            return BridgeAction::Ignored;
        };

        let now = Utc::now();
        shift.acknowledge(now);
        let shift_id = shift.id.clone();
        let op = self
            .engine
            .enqueue(OperationKind::Update, SyncEntity::Shift(shift))
            .await;
        info!("Acknowledged start of shift {}", shift_id);

        let notice = json!({
            "shiftId": shift_id,
            "operationId": op.id,
            "acknowledgedAt": now,
        });
        if let Err(e) = self.channel.send(SHIFT_ACK_EVENT, &notice).await {
            debug!("Could not send {}: {}", SHIFT_ACK_EVENT, e);
        }

        BridgeAction::Enqueued(op.id)
    }

    async fn resolve_shift(&self, data: &serde_json::Value) -> Option<Shift> {
        if let Some(payload) = data.get("shift") {
            return match serde_json::from_value(payload.clone()) {
                Ok(shift) => Some(shift),
                Err(e) => {
                    warn!("Invalid shift in push payload: {}", e);
                    None
                }
            };
        }

        let id = data.get("shiftId")?.as_str()?;
        match self.engine.replica().get(EntityType::Shift, id).await? {
            SyncEntity::Shift(shift) => Some(shift),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use tokio::sync::broadcast;

    use crate::models::ShiftStatus;
    use crate::push::PushError;
    use crate::sync::testing::{fast_settings, Harness, MockRemote};

    struct MockChannel {
        events_tx: broadcast::Sender<PushEvent>,
        connected: AtomicBool,
        sent: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl MockChannel {
        fn new(connected: bool) -> Self {
            Self {
                events_tx: broadcast::channel(16).0,
                connected: AtomicBool::new(connected),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl PushChannel for MockChannel {
        fn connect(&self) -> BoxFuture<'_, bool> {
            let connected = self.connected.load(Ordering::SeqCst);
            async move { connected }.boxed()
        }

        fn events(&self) -> broadcast::Receiver<PushEvent> {
            self.events_tx.subscribe()
        }

        fn send<'a>(&'a self, event: &'a str, data: &'a serde_json::Value) -> BoxFuture<'a, Result<(), PushError>> {
            async move {
                if !self.is_connected() {
                    return Err(PushError::NotConnected);
                }
                self.sent.lock().unwrap().push((event.to_string(), data.clone()));
                Ok(())
            }
            .boxed()
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn disconnect(&self) -> BoxFuture<'_, ()> {
            self.connected.store(false, Ordering::SeqCst);
            async {}.boxed()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<LocalNotification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: LocalNotification) {
            self.seen.lock().unwrap().push(notification);
        }
    }

    struct Fixture {
        harness: Harness,
        engine: Arc<SyncOrchestrator>,
        channel: Arc<MockChannel>,
        notifier: Arc<RecordingNotifier>,
        bridge: Arc<PushBridge>,
    }

    async fn fixture(connected: bool) -> Fixture {
        let harness = Harness::new(MockRemote::new());
        let engine = SyncOrchestrator::open(harness.deps(), fast_settings(), "device-1")
            .await
            .unwrap();
        let channel = Arc::new(MockChannel::new(connected));
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = Arc::new(PushBridge::new(engine.clone(), channel.clone(), notifier.clone()));
        Fixture {
            harness,
            engine,
            channel,
            notifier,
            bridge,
        }
    }

    fn message(event: &str, data: serde_json::Value) -> PushEvent {
        PushEvent::Message {
            event: event.to_string(),
            data,
        }
    }

    #[tokio::test]
    async fn test_sync_events_force_sync() {
        let f = fixture(true).await;
        f.engine.sync(true).await.unwrap();
        assert!(!f.engine.needs_sync());

        for (i, event) in SYNC_EVENTS.iter().enumerate() {
            let action = f.bridge.handle(message(event, json!({}))).await;
            assert_eq!(action, BridgeAction::Synced);
            assert_eq!(f.harness.remote.batch_count(), i + 2);
        }
    }

    #[tokio::test]
    async fn test_notification_events() {
        let f = fixture(true).await;
        let action = f
            .bridge
            .handle(message("chat:message", json!({"from": "Dispatch", "message": "hi"})))
            .await;
        assert_eq!(action, BridgeAction::Notified);

        let seen = f.notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].title, "Message from Dispatch");
        assert_eq!(f.harness.remote.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_shift_start_with_full_payload() {
        let f = fixture(true).await;
        let shift = Shift::new("shift-9", "user-1", "site-1");

        let action = f
            .bridge
            .handle(message(SHIFT_START_EVENT, json!({"shift": shift})))
            .await;
        let BridgeAction::Enqueued(op_id) = action else {
            panic!("expected an enqueued operation, got {:?}", action);
        };

        let op = f.engine.queue().get(&op_id).await.unwrap();
        assert_eq!(op.kind, OperationKind::Update);
        let SyncEntity::Shift(queued) = op.entity else {
            panic!("expected a shift");
        };
        assert_eq!(queued.status, ShiftStatus::InProgress);
        assert!(queued.acknowledged_at.is_some());

        let sent = f.channel.sent.lock().unwrap();
        assert_eq!(sent[0].0, SHIFT_ACK_EVENT);
        assert_eq!(sent[0].1["shiftId"], "shift-9");
        assert_eq!(sent[0].1["operationId"], op_id.as_str());
    }

    #[tokio::test]
    async fn test_shift_start_by_id_uses_replica() {
        let f = fixture(false).await;
        f.engine
            .enqueue(
                OperationKind::Create,
                SyncEntity::Shift(Shift::new("shift-3", "user-1", "site-1")),
            )
            .await;

        let action = f
            .bridge
            .handle(message(SHIFT_START_EVENT, json!({"shiftId": "shift-3"})))
            .await;
        assert!(matches!(action, BridgeAction::Enqueued(_)));
        // Offline channel: the notice is dropped, the write is still queued
        assert!(f.channel.sent.lock().unwrap().is_empty());
        assert_eq!(f.engine.get_queue_stats().pending, 2);

        let unknown = f
            .bridge
            .handle(message(SHIFT_START_EVENT, json!({"shiftId": "nope"})))
            .await;
        assert_eq!(unknown, BridgeAction::Ignored);
    }

    #[tokio::test]
    async fn test_unknown_and_lifecycle_events() {
        let f = fixture(true).await;
        assert_eq!(
            f.bridge.handle(message("presence:update", json!({}))).await,
            BridgeAction::Ignored
        );
        assert_eq!(f.bridge.handle(PushEvent::Disconnected).await, BridgeAction::Ignored);
        assert_eq!(f.bridge.handle(PushEvent::Connected).await, BridgeAction::Drained);
    }

    #[tokio::test]
    async fn test_started_bridge_runs_until_stopped() {
        let f = fixture(false).await;
        assert!(f.bridge.clone().start());
        assert!(!f.bridge.clone().start());
        tokio::task::yield_now().await;

        f.channel
            .events_tx
            .send(message("notification", json!({"title": "Hello"})))
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while f.notifier.seen.lock().unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(f.engine.stop_all_timers(), 1);
        assert!(!f.engine.timers().is_scheduled(BRIDGE_TIMER));
    }
}
