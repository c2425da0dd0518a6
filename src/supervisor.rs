//! Connection supervision.
//!
//! Drives the transport connection for each paired identifier:
//!
//! ```text
//! idle → connecting → open → closed (terminal | retryable)
//!            ▲                          │
//!            └──── bounded backoff ─────┘
//! ```
//!
//! At most one supervision task is live per identifier. Every call to
//! [`ConnectionSupervisor::start_connection`] bumps a per-identifier
//! generation counter; a task that observes a newer generation abandons
//! itself, so a reconnect scheduled by a stale attempt can never act after a
//! newer attempt has started.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::commands::CommandDispatcher;
use crate::config::ReconnectConfig;
use crate::notify::{NotificationSink, StatusEvent};
use crate::pairing::PairingRegistry;
use crate::session::SessionRegistry;
use crate::transport::{ConnectionState, Transport, TransportConnection, TransportEvent, TransportHandle};

/// How one driven connection ended.
enum Outcome {
    /// A newer attempt took over this identifier.
    Superseded,
    /// Closed for a terminal reason; supervision ends.
    Terminal,
    /// Closed for a transient reason; eligible for reconnect.
    Retryable { opened: bool },
}

/// Supervises transport connections per identifier.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    pairing: PairingRegistry,
    sessions: SessionRegistry,
    sink: Arc<dyn NotificationSink>,
    dispatcher: Arc<CommandDispatcher>,
    config: ReconnectConfig,
    welcome_message: String,
    generations: Arc<RwLock<HashMap<String, u64>>>,
    tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        pairing: PairingRegistry,
        sessions: SessionRegistry,
        sink: Arc<dyn NotificationSink>,
        dispatcher: Arc<CommandDispatcher>,
        config: ReconnectConfig,
        welcome_message: String,
    ) -> Self {
        Self {
            transport,
            pairing,
            sessions,
            sink,
            dispatcher,
            config,
            welcome_message,
            generations: Arc::new(RwLock::new(HashMap::new())),
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Begin (or restart) supervision for an identifier.
    ///
    /// Any prior attempt for the same identifier is superseded: its
    /// generation goes stale and its task is aborted.
    pub async fn start_connection(&self, identifier: &str, pairing_code: &str) {
        let generation = {
            let mut generations = self.generations.write().await;
            let counter = generations.entry(identifier.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let supervisor = self.clone();
        let task_identifier = identifier.to_string();
        let code = pairing_code.to_string();
        let task = tokio::spawn(async move {
            supervisor
                .supervise(&task_identifier, &code, generation)
                .await;
        });

        if let Some(prior) = self
            .tasks
            .write()
            .await
            .insert(identifier.to_string(), task)
        {
            prior.abort();
        }
    }

    /// Connect-and-drive loop for one identifier.
    ///
    /// Runs until the connection closes terminally, reconnect attempts are
    /// exhausted, or a newer generation supersedes this one.
    async fn supervise(&self, identifier: &str, pairing_code: &str, generation: u64) {
        let mut attempt: u32 = 0;
        loop {
            if !self.is_current(identifier, generation).await {
                return;
            }

            self.sink.notify(StatusEvent::connecting(identifier)).await;
            tracing::info!(identifier, attempt, "Opening transport connection");

            let connect = tokio::time::timeout(
                self.config.connect_timeout(),
                self.transport.connect(identifier),
            )
            .await;

            match connect {
                Ok(Ok(connection)) => {
                    match self
                        .drive(identifier, pairing_code, generation, connection)
                        .await
                    {
                        Outcome::Superseded => return,
                        Outcome::Terminal => {
                            self.pairing.remove(pairing_code).await;
                            return;
                        }
                        Outcome::Retryable { opened } => {
                            // A successful open resets the backoff sequence.
                            if opened {
                                attempt = 0;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(identifier, error = %e, "Transport connect failed");
                }
                Err(_) => {
                    tracing::warn!(
                        identifier,
                        timeout_ms = self.config.connect_timeout_ms,
                        "Transport connect timed out"
                    );
                }
            }

            attempt += 1;
            if self.config.max_attempts != 0 && attempt > self.config.max_attempts {
                tracing::warn!(
                    identifier,
                    attempts = attempt - 1,
                    "Reconnect attempts exhausted, ending supervision"
                );
                self.pairing.remove(pairing_code).await;
                return;
            }

            let delay = self.config.delay_for(attempt - 1);
            tracing::debug!(
                identifier,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Consume one connection's event stream until it closes.
    async fn drive(
        &self,
        identifier: &str,
        pairing_code: &str,
        generation: u64,
        connection: TransportConnection,
    ) -> Outcome {
        let TransportConnection { handle, mut events } = connection;
        let mut opened = false;

        while let Some(event) = events.recv().await {
            if !self.is_current(identifier, generation).await {
                return Outcome::Superseded;
            }

            match event {
                TransportEvent::CredentialsUpdated => {
                    tracing::debug!(identifier, "Transport credentials updated");
                }
                TransportEvent::StateChanged {
                    state: ConnectionState::Connecting,
                    ..
                } => {
                    self.sink.notify(StatusEvent::connecting(identifier)).await;
                }
                TransportEvent::StateChanged {
                    state: ConnectionState::Open,
                    ..
                } => {
                    opened = true;
                    if let Some(displaced) = self
                        .sessions
                        .insert(identifier, Arc::clone(&handle), pairing_code)
                        .await
                    {
                        if let Err(e) = displaced.handle.close().await {
                            tracing::debug!(identifier, error = %e, "Error closing displaced connection");
                        }
                    }
                    self.pairing.mark_connected(pairing_code).await;
                    self.pairing.clear_pending(identifier).await;
                    self.sink
                        .notify(StatusEvent::connected(identifier, Utc::now()))
                        .await;
                    tracing::info!(identifier, "Session established");
                    self.send_welcome(identifier, &handle);
                }
                TransportEvent::StateChanged {
                    state: ConnectionState::Closed,
                    reason,
                } => {
                    self.sessions.remove(identifier).await;
                    let reason_text = reason.as_ref().map(|r| r.to_string());
                    self.sink
                        .notify(StatusEvent::disconnected(identifier, reason_text.clone()))
                        .await;

                    if reason.as_ref().is_some_and(|r| r.is_terminal()) {
                        tracing::info!(
                            identifier,
                            reason = reason_text.as_deref(),
                            "Connection closed for terminal reason, ending supervision"
                        );
                        return Outcome::Terminal;
                    }
                    tracing::info!(
                        identifier,
                        reason = reason_text.as_deref(),
                        "Connection closed"
                    );
                    return Outcome::Retryable { opened };
                }
                TransportEvent::MessageReceived { text } => {
                    if let Some(reply) = self.dispatcher.dispatch(&text) {
                        if let Err(e) = handle.send(&reply).await {
                            tracing::warn!(identifier, error = %e, "Failed to send command reply");
                        }
                    }
                }
            }
        }

        // Event stream ended without a close event: treat as a transient drop.
        self.sessions.remove(identifier).await;
        self.sink
            .notify(StatusEvent::disconnected(
                identifier,
                Some("event stream ended".to_string()),
            ))
            .await;
        Outcome::Retryable { opened }
    }

    /// Welcome send is fire-and-forget: failure is logged, never fatal, and
    /// never affects session state.
    fn send_welcome(&self, identifier: &str, handle: &Arc<dyn TransportHandle>) {
        let handle = Arc::clone(handle);
        let identifier = identifier.to_string();
        let text = self.welcome_message.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.send(&text).await {
                tracing::warn!(identifier = %identifier, error = %e, "Welcome message failed");
            }
        });
    }

    async fn is_current(&self, identifier: &str, generation: u64) -> bool {
        self.generations.read().await.get(identifier) == Some(&generation)
    }

    /// Abort every supervision task and mark all generations stale.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.write().await;
        let count = tasks.len();
        for (_, task) in tasks.drain() {
            task.abort();
        }
        drop(tasks);
        self.generations.write().await.clear();
        tracing::info!(aborted = count, "Connection supervision stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{Mutex, mpsc};

    use super::*;
    use crate::config::PairingConfig;
    use crate::error::{ConnectError, SendError};
    use crate::notify::ChannelSink;
    use crate::pairing::PairingStatus;
    use crate::transport::DisconnectReason;

    #[derive(Default)]
    struct RecordingHandle {
        sent: Mutex<Vec<String>>,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl TransportHandle for RecordingHandle {
        async fn send(&self, text: &str) -> Result<(), SendError> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<(), SendError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Transport that replays one scripted event sequence per connect.
    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
        connects: AtomicUsize,
        handles: Mutex<Vec<Arc<RecordingHandle>>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<TransportEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            }
        }

        async fn handle(&self, index: usize) -> Arc<RecordingHandle> {
            Arc::clone(&self.handles.lock().await[index])
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&self, _identifier: &str) -> Result<TransportConnection, ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().await.pop_front().unwrap_or_default();

            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                // Keep the stream open so an exhausted script does not read
                // as a dropped connection.
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });

            let handle = Arc::new(RecordingHandle::default());
            self.handles.lock().await.push(Arc::clone(&handle));
            Ok(TransportConnection { handle, events: rx })
        }
    }

    /// Transport whose connects always fail.
    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn connect(&self, identifier: &str) -> Result<TransportConnection, ConnectError> {
            Err(ConnectError::Refused {
                identifier: identifier.to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }

    fn open_event() -> TransportEvent {
        TransportEvent::StateChanged {
            state: ConnectionState::Open,
            reason: None,
        }
    }

    fn close_event(reason: DisconnectReason) -> TransportEvent {
        TransportEvent::StateChanged {
            state: ConnectionState::Closed,
            reason: Some(reason),
        }
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 10,
            connect_timeout_ms: 1_000,
        }
    }

    struct Fixture {
        supervisor: ConnectionSupervisor,
        pairing: PairingRegistry,
        sessions: SessionRegistry,
        events: mpsc::UnboundedReceiver<StatusEvent>,
    }

    fn fixture(transport: Arc<dyn Transport>, config: ReconnectConfig) -> Fixture {
        let pairing = PairingRegistry::new(PairingConfig::default());
        let sessions = SessionRegistry::new();
        let (sink, events) = ChannelSink::new();
        let supervisor = ConnectionSupervisor::new(
            transport,
            pairing.clone(),
            sessions.clone(),
            Arc::new(sink),
            Arc::new(CommandDispatcher::new()),
            config,
            "welcome".to_string(),
        );
        Fixture {
            supervisor,
            pairing,
            sessions,
            events,
        }
    }

    async fn wait_until<F, Fut>(mut cond: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if cond().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_open_registers_session_and_marks_entry_connected() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![open_event()]]));
        let fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let sessions = fixture.sessions.clone();
        assert!(wait_until(|| sessions.contains("15551234567")).await);

        let entry = fixture.pairing.entry(&ticket.code).await.unwrap();
        assert_eq!(entry.status, PairingStatus::Connected);
        assert!(entry.connected_at.is_some());
    }

    #[tokio::test]
    async fn test_open_sends_welcome_message() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![open_event()]]));
        let fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let sessions = fixture.sessions.clone();
        assert!(wait_until(|| sessions.contains("15551234567")).await);

        let handle = transport.handle(0).await;
        assert!(
            wait_until(|| async {
                handle.sent.lock().await.contains(&"welcome".to_string())
            })
            .await
        );
    }

    #[tokio::test]
    async fn test_open_emits_connecting_then_connected() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![open_event()]]));
        let mut fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let first = fixture.events.recv().await.unwrap();
        assert_eq!(first.kind, crate::notify::StatusKind::Connecting);
        let second = fixture.events.recv().await.unwrap();
        assert_eq!(second.kind, crate::notify::StatusKind::Connected);
        assert!(second.connected_at.is_some());
    }

    #[tokio::test]
    async fn test_inbound_command_gets_reply() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            open_event(),
            TransportEvent::MessageReceived {
                text: "/ping".to_string(),
            },
        ]]));
        let fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let sessions = fixture.sessions.clone();
        assert!(wait_until(|| sessions.contains("15551234567")).await);

        let handle = transport.handle(0).await;
        assert!(
            wait_until(|| async { handle.sent.lock().await.contains(&"pong".to_string()) }).await
        );
    }

    #[tokio::test]
    async fn test_terminal_close_removes_session_without_reconnect() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            open_event(),
            close_event(DisconnectReason::LoggedOut),
        ]]));
        let fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let pairing = fixture.pairing.clone();
        let code = ticket.code.clone();
        assert!(wait_until(|| async { pairing.entry(&code).await.is_none() }).await);
        assert!(!fixture.sessions.contains("15551234567").await);

        // Well past the reconnect delay: no second connect happened.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_close_triggers_reconnect() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            vec![
                open_event(),
                close_event(DisconnectReason::ConnectionLost("stream error".to_string())),
            ],
            vec![open_event()],
        ]));
        let fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let connects = &transport.connects;
        assert!(wait_until(|| async { connects.load(Ordering::SeqCst) >= 2 }).await);

        // The reconnect re-established the session.
        let sessions = fixture.sessions.clone();
        assert!(wait_until(|| sessions.contains("15551234567")).await);
        assert!(fixture.pairing.entry(&ticket.code).await.is_some());
    }

    #[tokio::test]
    async fn test_connect_failures_exhaust_and_remove_entry() {
        let config = ReconnectConfig {
            base_delay_ms: 5,
            max_delay_ms: 10,
            max_attempts: 2,
            connect_timeout_ms: 1_000,
        };
        let fixture = fixture(Arc::new(FailingTransport), config);

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let pairing = fixture.pairing.clone();
        let code = ticket.code.clone();
        assert!(wait_until(|| async { pairing.entry(&code).await.is_none() }).await);
        assert!(!fixture.sessions.contains("15551234567").await);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_supervision() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![open_event()]]));
        let fixture = fixture(Arc::clone(&transport) as Arc<dyn Transport>, fast_reconnect());

        let ticket = fixture.pairing.generate("15551234567").await;
        fixture
            .supervisor
            .start_connection("15551234567", &ticket.code)
            .await;

        let sessions = fixture.sessions.clone();
        assert!(wait_until(|| sessions.contains("15551234567")).await);

        fixture.supervisor.shutdown().await;
        assert!(fixture.supervisor.tasks.read().await.is_empty());
        assert!(fixture.supervisor.generations.read().await.is_empty());
    }
}
