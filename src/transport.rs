//! Transport collaborator seam.
//!
//! The messaging transport is external to this crate: it can open a
//! connection for an identifier (restoring persisted credentials), send text,
//! and emit lifecycle/message events. The core consumes that capability
//! through the traits here and never sees protocol-level encoding or
//! credential internals.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ConnectError, SendError};

/// Lifecycle states reported by a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account was logged out on the remote end.
    LoggedOut,
    /// The account was banned by the transport.
    Banned,
    /// The connection dropped for a transient reason.
    ConnectionLost(String),
}

impl DisconnectReason {
    /// Terminal reasons end supervision; no reconnect is attempted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut | DisconnectReason::Banned)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::LoggedOut => write!(f, "logged_out"),
            DisconnectReason::Banned => write!(f, "banned"),
            DisconnectReason::ConnectionLost(detail) => {
                write!(f, "connection_lost: {}", detail)
            }
        }
    }
}

/// Events emitted by an open transport connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Persisted credential state changed on the transport side.
    CredentialsUpdated,
    /// The connection moved to a new lifecycle state.
    StateChanged {
        state: ConnectionState,
        reason: Option<DisconnectReason>,
    },
    /// Inbound text from the paired account.
    MessageReceived { text: String },
}

/// Send/close capability of one open connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), SendError>;
    async fn close(&self) -> Result<(), SendError>;
}

/// An opened connection: the handle plus its event stream.
pub struct TransportConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The external messaging transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection for `identifier`, restoring persisted credentials
    /// when present.
    async fn connect(&self, identifier: &str) -> Result<TransportConnection, ConnectError>;
}
