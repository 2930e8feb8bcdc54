//! Local notifications raised by push events

use serde::Serialize;
use tracing::info;

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
}

impl LocalNotification {
    /// Build from a push payload, falling back to a title derived from the
    /// event name
    pub fn from_event(event: &str, data: &serde_json::Value) -> Self {
        let text = |key: &str| data.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let title = text("title").unwrap_or_else(|| match event {
            "chat:message" => match text("from") {
                Some(from) => format!("Message from {}", from),
                None => "New message".to_string(),
            },
            _ => "Notification".to_string(),
        });
        let body = text("body")
            .or_else(|| text("message"))
            .unwrap_or_default();

        Self { title, body }
    }
}

/// Displays local notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: LocalNotification);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: LocalNotification) {
        info!(title = %notification.title, "{}", notification.body);
    }
}
