//! Error types for pairgate.

use std::time::Duration;

/// Errors returned by pairing request and verification operations.
///
/// These are always returned synchronously to the caller as typed results;
/// nothing in the pairing path panics or raises across the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Invalid identifier: {reason}")]
    Validation { reason: String },

    #[error("Identifier {identifier} already has an active session")]
    StateConflict { identifier: String },

    #[error("Unknown pairing code")]
    NotFound,

    #[error("Pairing code already processed (status: {status})")]
    AlreadyProcessed { status: String },

    #[error("Pairing code expired")]
    Expired,

    #[error("Invalid verification code ({remaining} attempts remaining)")]
    InvalidCode { remaining: u32 },

    #[error("Too many failed verification attempts, pairing code invalidated")]
    TooManyAttempts,
}

/// Errors opening a transport connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Transport connect timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Transport refused connection for {identifier}: {reason}")]
    Refused { identifier: String, reason: String },

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Errors sending on (or closing) an established session.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("No active session for {identifier}")]
    NoSession { identifier: String },

    #[error("Transport send failed: {reason}")]
    Transport { reason: String },
}
