//! Active session registry.
//!
//! Tracks the live transport session per identifier. At most one session
//! exists per identifier; removal closes the connection handle best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::transport::TransportHandle;

/// A live transport session for one identifier.
#[derive(Clone)]
pub struct Session {
    pub handle: Arc<dyn TransportHandle>,
    pub pairing_code: String,
    pub connected_at: DateTime<Utc>,
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub identifier: String,
    pub pairing_code: String,
    pub connected_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Registry of active sessions, keyed by identifier.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session, returning the one it displaced, if any.
    pub async fn insert(
        &self,
        identifier: &str,
        handle: Arc<dyn TransportHandle>,
        pairing_code: &str,
    ) -> Option<Session> {
        let session = Session {
            handle,
            pairing_code: pairing_code.to_string(),
            connected_at: Utc::now(),
        };
        self.sessions
            .write()
            .await
            .insert(identifier.to_string(), session)
    }

    pub async fn contains(&self, identifier: &str) -> bool {
        self.sessions.read().await.contains_key(identifier)
    }

    /// Connection handle for an identifier's session, if one is active.
    pub async fn handle(&self, identifier: &str) -> Option<Arc<dyn TransportHandle>> {
        self.sessions
            .read()
            .await
            .get(identifier)
            .map(|s| Arc::clone(&s.handle))
    }

    /// Remove a session, closing its handle best-effort. Returns whether a
    /// session existed.
    pub async fn remove(&self, identifier: &str) -> bool {
        let session = self.sessions.write().await.remove(identifier);
        match session {
            Some(session) => {
                if let Err(e) = session.handle.close().await {
                    tracing::debug!(identifier, error = %e, "Error closing connection handle");
                }
                true
            }
            None => false,
        }
    }

    /// Snapshots of all sessions, sorted by identifier.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let now = Utc::now();
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .iter()
            .map(|(identifier, session)| SessionSnapshot {
                identifier: identifier.clone(),
                pairing_code: session.pairing_code.clone(),
                connected_at: session.connected_at,
                uptime_secs: (now - session.connected_at).num_seconds().max(0) as u64,
            })
            .collect();
        snapshots.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        snapshots
    }

    /// Close and remove every session. Returns how many were closed.
    pub async fn drain_all(&self) -> usize {
        let drained: Vec<(String, Session)> =
            self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (identifier, session) in drained {
            if let Err(e) = session.handle.close().await {
                tracing::debug!(identifier = %identifier, error = %e, "Error closing connection handle");
            }
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
