//! Service facade.
//!
//! Ties the pairing registry, session registry, and connection supervisor
//! together behind the operations an HTTP/WebSocket layer calls. Rules that
//! cross component boundaries live here: the active-session guard at request
//! time, and the hand-off from a successful verify to the supervisor.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::commands::CommandDispatcher;
use crate::config::ServiceConfig;
use crate::error::{PairingError, SendError};
use crate::notify::NotificationSink;
use crate::pairing::{PairingRegistry, PairingStatusInfo, PairingTicket};
use crate::session::{SessionRegistry, SessionSnapshot};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Transport;

/// Outcome of a successful verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPairing {
    pub identifier: String,
}

/// The pairing/session orchestration service.
pub struct PairingService {
    pairing: PairingRegistry,
    sessions: SessionRegistry,
    supervisor: ConnectionSupervisor,
    sweeper: RwLock<Option<JoinHandle<()>>>,
}

impl PairingService {
    pub fn new(
        config: ServiceConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let pairing = PairingRegistry::new(config.pairing.clone());
        let sessions = SessionRegistry::new();
        let supervisor = ConnectionSupervisor::new(
            transport,
            pairing.clone(),
            sessions.clone(),
            sink,
            Arc::new(CommandDispatcher::new()),
            config.reconnect.clone(),
            config.welcome_message.clone(),
        );
        Self {
            pairing,
            sessions,
            supervisor,
            sweeper: RwLock::new(None),
        }
    }

    /// Request a pairing code for an identifier.
    ///
    /// Fails with `StateConflict` while the identifier holds an active
    /// session; otherwise any outstanding request for the identifier is
    /// replaced.
    pub async fn request_pairing(&self, identifier: &str) -> Result<PairingTicket, PairingError> {
        let identifier = normalize_identifier(identifier)?;
        if self.sessions.contains(&identifier).await {
            return Err(PairingError::StateConflict { identifier });
        }

        let ticket = self.pairing.generate(&identifier).await;
        tracing::info!(
            identifier = %identifier,
            code = %ticket.code,
            expires_in_secs = ticket.expires_in_secs,
            "Issued pairing code"
        );
        Ok(ticket)
    }

    /// Verify a pairing code and, on success, start the transport connection.
    ///
    /// The connection is supervised in the background; connect failures after
    /// this point are logged and retried, never surfaced to this caller.
    pub async fn verify_pairing(
        &self,
        code: &str,
        supplied: &str,
    ) -> Result<VerifiedPairing, PairingError> {
        let identifier = self.pairing.verify(code, supplied).await?;
        tracing::info!(identifier = %identifier, code, "Pairing verified, starting connection");
        self.supervisor.start_connection(&identifier, code).await;
        Ok(VerifiedPairing { identifier })
    }

    /// Status of a pairing code. `None` for codes that never existed or were
    /// expired, invalidated, or torn down.
    pub async fn status(&self, code: &str) -> Option<PairingStatusInfo> {
        self.pairing.status(code).await
    }

    /// Snapshots of all active sessions.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions.list().await
    }

    /// Send text on an identifier's active session.
    pub async fn send_message(&self, identifier: &str, text: &str) -> Result<(), SendError> {
        let handle =
            self.sessions
                .handle(identifier)
                .await
                .ok_or_else(|| SendError::NoSession {
                    identifier: identifier.to_string(),
                })?;
        handle.send(text).await
    }

    /// Start the periodic expired-entry sweeper. Idempotent.
    pub async fn spawn_sweeper(&self) {
        let mut sweeper = self.sweeper.write().await;
        if sweeper.is_none() {
            *sweeper = Some(self.pairing.spawn_sweeper());
        }
    }

    /// Deterministic teardown: stop the sweeper, cancel all pending pairing
    /// timers, end supervision, and close every open session.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.write().await.take() {
            handle.abort();
        }
        let cancelled = self.pairing.shutdown().await;
        self.supervisor.shutdown().await;
        let closed = self.sessions.drain_all().await;
        tracing::info!(cancelled, closed, "Pairing service shut down");
    }
}

/// Validate a phone-number-like identifier, returning its canonical digits.
fn normalize_identifier(raw: &str) -> Result<String, PairingError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(PairingError::Validation {
            reason: "identifier must not be empty".to_string(),
        });
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PairingError::Validation {
            reason: "identifier must contain only digits (optionally prefixed with '+')"
                .to_string(),
        });
    }
    if !(7..=15).contains(&digits.len()) {
        return Err(PairingError::Validation {
            reason: "identifier must be 7 to 15 digits".to_string(),
        });
    }
    Ok(digits.to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::ConnectError;
    use crate::notify::LogSink;
    use crate::transport::TransportConnection;

    /// Transport that refuses every connect; request/verify-path tests never
    /// need a live connection.
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(&self, identifier: &str) -> Result<TransportConnection, ConnectError> {
            Err(ConnectError::Refused {
                identifier: identifier.to_string(),
                reason: "null transport".to_string(),
            })
        }
    }

    fn service() -> PairingService {
        let config = ServiceConfig {
            reconnect: crate::config::ReconnectConfig {
                base_delay_ms: 5,
                max_delay_ms: 10,
                max_attempts: 1,
                connect_timeout_ms: 100,
            },
            ..ServiceConfig::default()
        };
        PairingService::new(config, Arc::new(NullTransport), Arc::new(LogSink))
    }

    // ── Identifier validation ──

    #[test]
    fn test_normalize_accepts_plain_digits() {
        assert_eq!(normalize_identifier("15551234567").unwrap(), "15551234567");
    }

    #[test]
    fn test_normalize_strips_plus_prefix() {
        assert_eq!(normalize_identifier("+15551234567").unwrap(), "15551234567");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(
            normalize_identifier("  15551234567  ").unwrap(),
            "15551234567"
        );
    }

    #[test]
    fn test_normalize_rejects_empty() {
        let err = normalize_identifier("").unwrap_err();
        assert!(matches!(err, PairingError::Validation { .. }));
    }

    #[test]
    fn test_normalize_rejects_letters() {
        let err = normalize_identifier("1555abc4567").unwrap_err();
        assert!(matches!(err, PairingError::Validation { .. }));
    }

    #[test]
    fn test_normalize_rejects_wrong_length() {
        assert!(normalize_identifier("123").is_err());
        assert!(normalize_identifier("1234567890123456").is_err());
    }

    // ── Request / verify paths ──

    #[tokio::test]
    async fn test_request_pairing_returns_ticket() {
        let service = service();
        let ticket = service.request_pairing("15551234567").await.unwrap();
        assert_eq!(ticket.code.len(), 8);
        assert_eq!(ticket.verification_code.len(), 6);
        assert_eq!(ticket.expires_in_secs, 600);
    }

    #[tokio::test]
    async fn test_request_pairing_rejects_bad_identifier() {
        let service = service();
        let err = service.request_pairing("not-a-number").await.unwrap_err();
        assert!(matches!(err, PairingError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_second_request_invalidates_first_code() {
        let service = service();
        let first = service.request_pairing("15551234567").await.unwrap();
        let second = service.request_pairing("15551234567").await.unwrap();

        let err = service
            .verify_pairing(&first.code, &first.verification_code)
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::NotFound));

        let verified = service
            .verify_pairing(&second.code, &second.verification_code)
            .await
            .unwrap();
        assert_eq!(verified.identifier, "15551234567");
    }

    #[tokio::test]
    async fn test_status_of_unknown_code_is_none() {
        let service = service();
        assert!(service.status("00000000").await.is_none());
    }

    #[tokio::test]
    async fn test_send_message_without_session_fails() {
        let service = service();
        let err = service
            .send_message("15551234567", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::NoSession { .. }));
    }

    #[tokio::test]
    async fn test_list_sessions_empty_by_default() {
        let service = service();
        assert!(service.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_clean_with_no_activity() {
        let service = service();
        service.request_pairing("15551234567").await.unwrap();
        service.spawn_sweeper().await;
        service.shutdown().await;
        // No panics, and pending timers are gone.
        service.shutdown().await;
    }
}
