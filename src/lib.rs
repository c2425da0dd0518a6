//! pairgate — pairing-code activation and supervision of messaging sessions.
//!
//! A pairing request issues a short-lived pairing code plus a separate
//! verification code for a messaging identifier. Once verified, the service
//! opens a transport connection and supervises it: sessions are registered on
//! open, reconnected with bounded backoff after transient drops, torn down on
//! terminal failures, and every status change fans out to a notification sink.
//!
//! ```text
//! request_pairing ──► PairingRegistry ◄── verify_pairing
//!                                              │
//!                                              ▼
//!                                     ConnectionSupervisor ──► Transport
//!                                              │
//!                         ┌────────────────────┼────────────────────┐
//!                         ▼                    ▼                    ▼
//!                  SessionRegistry      NotificationSink    CommandDispatcher
//! ```
//!
//! The transport itself (protocol encoding, credential persistence) and the
//! HTTP/WebSocket surface that calls these operations live outside this crate.

pub mod commands;
pub mod config;
pub mod error;
pub mod notify;
pub mod pairing;
pub mod service;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use commands::CommandDispatcher;
pub use config::{PairingConfig, ReconnectConfig, ServiceConfig};
pub use error::{ConnectError, PairingError, SendError};
pub use notify::{ChannelSink, LogSink, NotificationSink, StatusEvent, StatusKind};
pub use pairing::{
    PairingEntry, PairingRegistry, PairingStatus, PairingStatusInfo, PairingTicket,
    PendingRequestTracker,
};
pub use service::{PairingService, VerifiedPairing};
pub use session::{Session, SessionRegistry, SessionSnapshot};
pub use supervisor::ConnectionSupervisor;
pub use transport::{
    ConnectionState, DisconnectReason, Transport, TransportConnection, TransportEvent,
    TransportHandle,
};

/// Initialize tracing with env-filter defaults. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
