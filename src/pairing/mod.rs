//! Pairing-code issuance and verification.
//!
//! A pairing request issues a short-lived numeric code plus a separate
//! verification code for one identifier. Verifying the pair activates the
//! session; expired, replaced, or attempt-exhausted codes are deleted.

pub mod code;
mod pending;
mod registry;

pub use pending::PendingRequestTracker;
pub use registry::{
    PairingEntry, PairingRegistry, PairingStatus, PairingStatusInfo, PairingTicket,
};
