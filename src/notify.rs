//! Push notification relay
//!
//! Holds no cache state. Push payloads are forwarded unmodified to the host's
//! notification surface; notification clicks are answered with what the host
//! should do next.

use bytes::Bytes;
use tracing::info;

/// Actions that close a notification without opening the app
const DISMISS_ACTIONS: &[&str] = &["dismiss", "close"];

/// Host surface that displays notifications
pub trait NotificationSink: Send + Sync {
    /// Shows a notification built from the raw push payload
    fn show(&self, payload: Bytes);
}

/// Sink that writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn show(&self, payload: Bytes) {
        info!(payload = %String::from_utf8_lossy(&payload), "notification");
    }
}

/// What the host should do after a notification click
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Focus or open a window at the URL
    OpenWindow(String),
    /// Close the notification only
    Dismiss,
}

/// Forwards push events and answers notification clicks
pub struct NotificationRelay {
    sink: std::sync::Arc<dyn NotificationSink>,
    home: String,
}

impl NotificationRelay {
    /// `home` is the URL opened when a notification is clicked
    pub fn new(sink: std::sync::Arc<dyn NotificationSink>, home: impl Into<String>) -> Self {
        Self {
            sink,
            home: home.into(),
        }
    }

    /// Forwards a push payload as-is
    pub fn push(&self, payload: Bytes) {
        self.sink.show(payload);
    }

    /// Decides the response to a click on a notification or one of its actions
    pub fn click(&self, action: Option<&str>) -> ClickOutcome {
        match action {
            Some(action) if DISMISS_ACTIONS.contains(&action) => ClickOutcome::Dismiss,
            _ => ClickOutcome::OpenWindow(self.home.clone()),
        }
    }
}
