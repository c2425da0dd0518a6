//! Pending pairing request tracking.
//!
//! At most one outstanding pairing request exists per identifier. Each
//! request is bound to a token unique to that request instance, so a timer
//! firing concurrently with a cancel (or with a replacement request) can
//! never act on a request it does not own.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A tracked pairing request awaiting verification.
#[derive(Debug)]
struct PendingRequest {
    code: String,
    token: Uuid,
    timer: Option<JoinHandle<()>>,
}

/// Tracks the single outstanding pairing request per identifier.
#[derive(Debug, Clone)]
pub struct PendingRequestTracker {
    requests: Arc<RwLock<HashMap<String, PendingRequest>>>,
}

impl PendingRequestTracker {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Track a new request, replacing any prior one for the identifier.
    ///
    /// The prior request's timer is aborted. Returns the new request's token
    /// and the pairing code of the replaced request, if one was outstanding.
    pub async fn track(&self, identifier: &str, code: &str) -> (Uuid, Option<String>) {
        let token = Uuid::new_v4();
        let request = PendingRequest {
            code: code.to_string(),
            token,
            timer: None,
        };

        let mut requests = self.requests.write().await;
        let replaced = requests.insert(identifier.to_string(), request).map(|prior| {
            if let Some(timer) = prior.timer {
                timer.abort();
            }
            prior.code
        });
        (token, replaced)
    }

    /// Attach the expiry timer for a tracked request.
    ///
    /// If the request was already replaced or cancelled, the timer is aborted
    /// instead of attached.
    pub async fn attach_timer(&self, identifier: &str, token: Uuid, timer: JoinHandle<()>) {
        let mut requests = self.requests.write().await;
        match requests.get_mut(identifier) {
            Some(request) if request.token == token => request.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Cancel the request for an identifier, aborting its timer.
    ///
    /// Idempotent. Returns the pairing code if a request was outstanding.
    pub async fn cancel(&self, identifier: &str) -> Option<String> {
        let request = self.requests.write().await.remove(identifier)?;
        if let Some(timer) = request.timer {
            timer.abort();
        }
        Some(request.code)
    }

    /// Resolve a firing timer: yields the request's pairing code only if
    /// `token` still names the current request for the identifier.
    pub async fn complete_if_current(&self, identifier: &str, token: Uuid) -> Option<String> {
        let mut requests = self.requests.write().await;
        let current = requests
            .get(identifier)
            .is_some_and(|request| request.token == token);
        if !current {
            return None;
        }
        requests.remove(identifier).map(|request| request.code)
    }

    /// Pairing code of the identifier's outstanding request, if any.
    pub async fn code_for(&self, identifier: &str) -> Option<String> {
        self.requests
            .read()
            .await
            .get(identifier)
            .map(|r| r.code.clone())
    }

    /// Cancel every tracked request, aborting all timers. Returns how many
    /// were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut requests = self.requests.write().await;
        let count = requests.len();
        for (_, request) in requests.drain() {
            if let Some(timer) = request.timer {
                timer.abort();
            }
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

impl Default for PendingRequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
