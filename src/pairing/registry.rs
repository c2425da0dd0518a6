//! Pairing code registry.
//!
//! Owns pairing-code entries and their expiry/attempt state. Codes are
//! unique across live entries, each identifier has at most one pending
//! request, and every pending request carries a cancellable expiry timer.
//!
//! ```text
//! generate()  --> Pending entry + expiry timer
//! verify()    --> Verified (or attempts exhausted / expired)
//! open        --> mark_connected()
//! sweeper     --> sweep_expired()
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PairingConfig;
use crate::error::PairingError;
use crate::pairing::code::generate_numeric_code;
use crate::pairing::pending::PendingRequestTracker;

/// Lifecycle status of a pairing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Pending,
    Verified,
    Connected,
    Expired,
    Invalidated,
}

impl std::fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingStatus::Pending => write!(f, "pending"),
            PairingStatus::Verified => write!(f, "verified"),
            PairingStatus::Connected => write!(f, "connected"),
            PairingStatus::Expired => write!(f, "expired"),
            PairingStatus::Invalidated => write!(f, "invalidated"),
        }
    }
}

/// A single pairing attempt: codes, expiry, and verification attempts.
#[derive(Debug, Clone)]
pub struct PairingEntry {
    pub code: String,
    pub identifier: String,
    pub verification_code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PairingStatus,
    pub attempts: u32,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Codes handed back to the caller on a successful pairing request.
#[derive(Debug, Clone, Serialize)]
pub struct PairingTicket {
    pub code: String,
    pub verification_code: String,
    pub expires_in_secs: u64,
}

/// Point-in-time view of an entry for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct PairingStatusInfo {
    pub status: PairingStatus,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_in_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

/// Registry of pairing codes and their pending requests.
///
/// Shared state behind `Arc<RwLock<_>>`; locks are held only around map
/// mutation, never across timers or transport calls.
#[derive(Clone)]
pub struct PairingRegistry {
    config: PairingConfig,
    entries: Arc<RwLock<HashMap<String, PairingEntry>>>,
    pending: PendingRequestTracker,
}

impl PairingRegistry {
    pub fn new(config: PairingConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            pending: PendingRequestTracker::new(),
        }
    }

    /// Issue a new pairing code for an identifier.
    ///
    /// Cancels and replaces any outstanding pending request for the same
    /// identifier (deleting its entry), inserts a `Pending` entry, and
    /// schedules its expiry timer. The caller is responsible for the
    /// active-session guard.
    pub async fn generate(&self, identifier: &str) -> PairingTicket {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(self.config.expiry_secs as i64);

        let mut entries = self.entries.write().await;
        // Regenerate on collision: codes are unique across live entries.
        let code = loop {
            let candidate = generate_numeric_code(self.config.code_length);
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        let verification_code = generate_numeric_code(self.config.verification_length);

        entries.insert(
            code.clone(),
            PairingEntry {
                code: code.clone(),
                identifier: identifier.to_string(),
                verification_code: verification_code.clone(),
                created_at: now,
                expires_at,
                status: PairingStatus::Pending,
                attempts: 0,
                connected_at: None,
            },
        );
        drop(entries);

        let (token, replaced) = self.pending.track(identifier, &code).await;
        if let Some(old_code) = replaced {
            self.entries.write().await.remove(&old_code);
            tracing::debug!(
                identifier,
                old_code = %old_code,
                "Replaced outstanding pairing request"
            );
        }

        let registry = self.clone();
        let timer_identifier = identifier.to_string();
        let expiry = Duration::from_secs(self.config.expiry_secs);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            registry.expire_pending(&timer_identifier, token).await;
        });
        self.pending.attach_timer(identifier, token, timer).await;

        tracing::debug!(identifier, code = %code, "Issued pairing code");
        PairingTicket {
            code,
            verification_code,
            expires_in_secs: self.config.expiry_secs,
        }
    }

    /// Timer callback: expire the request bound to `token` if it is still the
    /// identifier's current request and has not progressed past `Pending`.
    async fn expire_pending(&self, identifier: &str, token: Uuid) {
        let Some(code) = self.pending.complete_if_current(identifier, token).await else {
            return;
        };
        let mut entries = self.entries.write().await;
        if entries
            .get(&code)
            .is_some_and(|e| e.status == PairingStatus::Pending)
        {
            entries.remove(&code);
            tracing::info!(identifier, code = %code, "Pairing code expired");
        }
    }

    /// Verify a pairing code against a supplied verification code.
    ///
    /// On success the entry becomes `Verified` and the paired identifier is
    /// returned; the caller then starts the transport connection.
    pub async fn verify(&self, code: &str, supplied: &str) -> Result<String, PairingError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(code).ok_or(PairingError::NotFound)?;

        if entry.status != PairingStatus::Pending {
            return Err(PairingError::AlreadyProcessed {
                status: entry.status.to_string(),
            });
        }

        if Utc::now() > entry.expires_at {
            let identifier = entry.identifier.clone();
            entries.remove(code);
            drop(entries);
            self.pending.cancel(&identifier).await;
            return Err(PairingError::Expired);
        }

        if entry.verification_code != supplied {
            entry.attempts += 1;
            if entry.attempts >= self.config.max_attempts {
                let identifier = entry.identifier.clone();
                entries.remove(code);
                drop(entries);
                self.pending.cancel(&identifier).await;
                tracing::warn!(
                    identifier = %identifier,
                    code,
                    "Pairing code invalidated after too many attempts"
                );
                return Err(PairingError::TooManyAttempts);
            }
            let remaining = self.config.max_attempts - entry.attempts;
            return Err(PairingError::InvalidCode { remaining });
        }

        entry.status = PairingStatus::Verified;
        Ok(entry.identifier.clone())
    }

    /// Snapshot for status queries. `None` for unknown codes.
    pub async fn status(&self, code: &str) -> Option<PairingStatusInfo> {
        let entries = self.entries.read().await;
        let entry = entries.get(code)?;
        let expires_in_secs = (entry.expires_at - Utc::now()).num_seconds().max(0) as u64;
        Some(PairingStatusInfo {
            status: entry.status,
            identifier: entry.identifier.clone(),
            created_at: entry.created_at,
            expires_in_secs,
            connected_at: entry.connected_at,
        })
    }

    /// Mark the entry for `code` as connected, stamping `connected_at`.
    pub async fn mark_connected(&self, code: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(code) {
            entry.status = PairingStatus::Connected;
            entry.connected_at = Some(Utc::now());
        }
    }

    /// Remove an entry outright (terminal disconnect, retry exhaustion).
    pub async fn remove(&self, code: &str) -> Option<PairingEntry> {
        self.entries.write().await.remove(code)
    }

    /// Drop the pending-request record (and its timer) once a verified
    /// pairing goes live. The entry itself is kept.
    pub async fn clear_pending(&self, identifier: &str) {
        self.pending.cancel(identifier).await;
    }

    /// Cancel an identifier's pending request and delete its entry.
    /// Returns the cancelled code, if one was outstanding.
    pub async fn cancel_for_identifier(&self, identifier: &str) -> Option<String> {
        let code = self.pending.cancel(identifier).await?;
        self.entries.write().await.remove(&code);
        Some(code)
    }

    /// Remove entries past expiry whose status is not `Connected`.
    /// Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<(String, String)> = entries
            .iter()
            .filter(|(_, e)| e.status != PairingStatus::Connected && now > e.expires_at)
            .map(|(code, e)| (code.clone(), e.identifier.clone()))
            .collect();
        for (code, _) in &expired {
            entries.remove(code);
        }
        drop(entries);

        // A pending entry past expiry is always the identifier's current
        // request (replacement deletes the old entry), so cancelling by
        // identifier is safe.
        for (code, identifier) in &expired {
            self.pending.cancel(identifier).await;
            tracing::debug!(identifier = %identifier, code = %code, "Swept expired pairing entry");
        }
        expired.len()
    }

    /// Start the periodic sweep of expired entries.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let interval = Duration::from_secs(self.config.sweep_interval_secs);

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Pairing code sweeper started"
            );
            let mut timer = tokio::time::interval(interval);
            // The first tick fires immediately; skip it.
            timer.tick().await;
            loop {
                timer.tick().await;
                let swept = registry.sweep_expired().await;
                if swept > 0 {
                    tracing::info!(swept, "Swept expired pairing codes");
                }
            }
        })
    }

    /// Cancel all pending timers. Returns how many were cancelled.
    pub async fn shutdown(&self) -> usize {
        self.pending.cancel_all().await
    }

    /// A clone of the entry for `code`, if present.
    pub async fn entry(&self, code: &str) -> Option<PairingEntry> {
        self.entries.read().await.get(code).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Force an entry's expiry into the past.
    #[cfg(test)]
    async fn backdate(&self, code: &str, secs: i64) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(code) {
            entry.expires_at = Utc::now() - chrono::Duration::seconds(secs);
        }
    }
}
