//! Status-change notifications.
//!
//! The supervisor fans out `connecting`/`connected`/`disconnected` events to a
//! [`NotificationSink`]. Delivery is best-effort with no acknowledgement; an
//! implementation must never block the supervisor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusKind::Connecting => write!(f, "connecting"),
            StatusKind::Connected => write!(f, "connected"),
            StatusKind::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A status-change event for one identifier.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub kind: StatusKind,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl StatusEvent {
    pub fn connecting(identifier: &str) -> Self {
        Self {
            kind: StatusKind::Connecting,
            identifier: identifier.to_string(),
            reason: None,
            connected_at: None,
        }
    }

    pub fn connected(identifier: &str, connected_at: DateTime<Utc>) -> Self {
        Self {
            kind: StatusKind::Connected,
            identifier: identifier.to_string(),
            reason: None,
            connected_at: Some(connected_at),
        }
    }

    pub fn disconnected(identifier: &str, reason: Option<String>) -> Self {
        Self {
            kind: StatusKind::Disconnected,
            identifier: identifier.to_string(),
            reason,
            connected_at: None,
        }
    }
}

/// Receives status events for display.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: StatusEvent);
}

/// Forwards events into an unbounded channel. A dropped receiver is ignored.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }
}

/// Logs events through `tracing`, for deployments without a push channel.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: StatusEvent) {
        tracing::info!(
            kind = %event.kind,
            identifier = %event.identifier,
            reason = event.reason.as_deref(),
            "Session status changed"
        );
    }
}
