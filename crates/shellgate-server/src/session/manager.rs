//! Shell session lifecycle management.
//!
//! Owns the live context map (business session id → transport + executor),
//! drives status transitions through the audit store, and runs the expiry
//! sweep. The live map is the only place a running shell is reachable from;
//! removing an entry is what makes a session unreachable to concurrent
//! writers, so every teardown path starts with a removal.

use super::model::{generate_session_id, ConnectParams, ShellSession};
use super::store::SessionStore;
use crate::shell::ShellPublisher;
use crate::ssh::client::validate_params;
use crate::ssh::{ExecutionContext, ShellExecutor, ShellExit, ShellOutputHandler, ShellTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shellgate_core::{ErrorKind, ShellError, ShellResult, ShellSessionInfo, ShellStatus};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error message recorded on sessions reaped by the sweep.
pub const SESSION_EXPIRED: &str = "session expired";

/// In-memory handles for one business session.
struct SessionContext {
    expires_at: DateTime<Utc>,
    status: ShellStatus,
    /// Connect parameters waiting for the shell to be opened.
    pending: Option<ConnectParams>,
    transport: Option<Arc<dyn ShellTransport>>,
    execution: Option<Arc<ExecutionContext>>,
}

pub struct ShellSessionManager {
    contexts: DashMap<String, SessionContext>,
    store: Arc<dyn SessionStore>,
    executor: ShellExecutor,
    publisher: ShellPublisher,
    ttl: Duration,
    max_sessions: usize,
}

impl ShellSessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        executor: ShellExecutor,
        publisher: ShellPublisher,
        ttl: Duration,
        max_sessions: usize,
    ) -> Self {
        Self {
            contexts: DashMap::new(),
            store,
            executor,
            publisher,
            ttl,
            max_sessions,
        }
    }

    pub fn executor(&self) -> &ShellExecutor {
        &self.executor
    }

    /// Allocate an id, persist a CONNECTING row and register an empty
    /// context holding `params` until the shell is opened.
    pub async fn create_session(
        &self,
        params: ConnectParams,
        owner: &str,
    ) -> ShellResult<ShellSession> {
        validate_params(&params)?;
        if self.contexts.len() >= self.max_sessions {
            return Err(ShellError::InvalidState("max sessions reached".into()));
        }

        let now = Utc::now();
        let mut session_id = generate_session_id(now);
        while self.contexts.contains_key(&session_id) || self.store.find(&session_id).await?.is_some()
        {
            session_id = generate_session_id(now);
        }

        let session = ShellSession::connecting(session_id.clone(), &params, owner, now, self.ttl);
        self.store.insert(&session).await?;
        self.contexts.insert(
            session_id.clone(),
            SessionContext {
                expires_at: session.expires_at,
                status: ShellStatus::Connecting,
                pending: Some(params),
                transport: None,
                execution: None,
            },
        );

        info!(
            session_id = %session_id,
            host = %session.host,
            port = session.port,
            username = %session.username,
            owner = %owner,
            "shell session created"
        );
        Ok(session)
    }

    /// Hand out the stored connect parameters, once, for a CONNECTING session.
    pub fn take_pending(&self, session_id: &str) -> ShellResult<ConnectParams> {
        let mut ctx = self
            .contexts
            .get_mut(session_id)
            .ok_or_else(|| ShellError::SessionNotFound(session_id.to_string()))?;
        if ctx.status != ShellStatus::Connecting {
            return Err(ShellError::InvalidState(format!(
                "session {session_id} is {}",
                ctx.status
            )));
        }
        ctx.pending
            .take()
            .ok_or_else(|| ShellError::InvalidState(format!("session {session_id} is already opening")))
    }

    /// Output handler wired to this session's topic and exit supervision.
    pub fn output_handler(self: &Arc<Self>, session_id: &str) -> Arc<dyn ShellOutputHandler> {
        Arc::new(SessionOutput {
            session_id: session_id.to_string(),
            publisher: self.publisher.clone(),
            manager: Arc::downgrade(self),
        })
    }

    /// Bind live handles and move CONNECTING → CONNECTED.
    ///
    /// Returns `Ok(false)` without creating anything when the session is no
    /// longer live (reaped or closed meanwhile); the caller still owns the
    /// handles and must release them.
    pub async fn attach(
        &self,
        session_id: &str,
        transport: Arc<dyn ShellTransport>,
        execution: Arc<ExecutionContext>,
    ) -> ShellResult<bool> {
        {
            let Some(mut ctx) = self.contexts.get_mut(session_id) else {
                info!(session_id, "attach ignored, session is not live");
                return Ok(false);
            };
            if ctx.status != ShellStatus::Connecting {
                return Err(ShellError::InvalidState(format!(
                    "cannot attach to session {session_id} in state {}",
                    ctx.status
                )));
            }
            ctx.status = ShellStatus::Connected;
            ctx.transport = Some(transport);
            ctx.execution = Some(execution);
        }

        self.store
            .transition(session_id, ShellStatus::Connected, Utc::now())
            .await?;
        info!(session_id, "shell session attached");
        Ok(true)
    }

    /// Forward raw input to the shell.
    ///
    /// One logical writer per session is assumed; writes are not serialized
    /// beyond the channel's own ordering. A carriage return in the input
    /// counts as one completed command.
    pub async fn write(&self, session_id: &str, input: &[u8]) -> ShellResult<()> {
        let execution = {
            let ctx = self
                .contexts
                .get(session_id)
                .ok_or_else(|| ShellError::SessionNotFound(session_id.to_string()))?;
            if ctx.status != ShellStatus::Connected {
                return Err(ShellError::NotConnected(format!(
                    "session {session_id} is {}",
                    ctx.status
                )));
            }
            ctx.execution
                .clone()
                .ok_or_else(|| ShellError::NotConnected(session_id.to_string()))?
        };

        debug!(session_id, input = %input.escape_ascii(), "shell input");

        if let Err(e) = self.executor.write(&execution, input).await {
            // A context closed under us is a usage error, not a broken PTY.
            if e.kind() == ErrorKind::Io {
                warn!(session_id, error = %e, "shell write failed");
                self.fail(session_id, &e.to_string()).await;
            }
            return Err(e);
        }

        if let Err(e) = self.store.touch(session_id, Utc::now()).await {
            warn!(session_id, error = %e, "failed to record activity");
        }
        if input.contains(&b'\r') {
            if let Err(e) = self.store.increment_commands(session_id).await {
                warn!(session_id, error = %e, "failed to count command");
            }
        }
        Ok(())
    }

    /// Persist a status change. Illegal steps are ignored; returns whether
    /// the stored status changed.
    pub async fn update_status(&self, session_id: &str, status: ShellStatus) -> ShellResult<bool> {
        if let Some(mut ctx) = self.contexts.get_mut(session_id) {
            if ctx.status.can_transition_to(status) {
                ctx.status = status;
            }
        }
        let changed = self
            .store
            .transition(session_id, status, Utc::now())
            .await?;
        if changed {
            info!(session_id, status = %status, "shell session status changed");
        }
        Ok(changed)
    }

    /// Move to ERROR and record `message`.
    pub async fn update_error_message(&self, session_id: &str, message: &str) -> ShellResult<bool> {
        let changed = self.update_status(session_id, ShellStatus::Error).await?;
        if changed {
            self.store.set_error(session_id, message).await?;
            warn!(session_id, error = message, "shell session failed");
        }
        Ok(changed)
    }

    /// Record ERROR, force-close and tell the client.
    pub async fn fail(&self, session_id: &str, message: &str) {
        if let Err(e) = self.update_error_message(session_id, message).await {
            warn!(session_id, error = %e, "failed to record session error");
        }
        if let Some((_, ctx)) = self.contexts.remove(session_id) {
            self.teardown(session_id, ctx).await;
        }
        self.publisher.error(session_id, message).await;
        self.publisher
            .status(session_id, ShellStatus::Error, message)
            .await;
    }

    /// Remove the live context, close the shell and persist DISCONNECTED.
    /// Closing an absent session only touches the audit row.
    pub async fn close(&self, session_id: &str) -> ShellResult<()> {
        self.close_with_reason(session_id, "session closed").await
    }

    pub async fn close_with_reason(&self, session_id: &str, reason: &str) -> ShellResult<()> {
        if let Some((_, ctx)) = self.contexts.remove(session_id) {
            self.teardown(session_id, ctx).await;
        }
        if self.update_status(session_id, ShellStatus::Disconnected).await? {
            self.publisher
                .status(session_id, ShellStatus::Disconnected, reason)
                .await;
        }
        Ok(())
    }

    async fn teardown(&self, session_id: &str, ctx: SessionContext) {
        if let Some(execution) = &ctx.execution {
            self.executor.close(execution).await;
        }
        if let Some(transport) = &ctx.transport {
            transport.disconnect().await;
        }
        debug!(session_id, "session context released");
    }

    /// React to the reader task ending on its own.
    pub async fn on_shell_exit(&self, session_id: &str, exit: ShellExit) {
        match exit {
            ShellExit::Closed => {
                info!(session_id, "remote shell closed the stream");
                if let Err(e) = self.close_with_reason(session_id, "remote shell exited").await {
                    warn!(session_id, error = %e, "failed to close exited session");
                }
            }
            ShellExit::Failed(message) => {
                self.fail(session_id, &format!("read failed: {message}")).await;
            }
        }
    }

    pub async fn cleanup_expired(&self) -> Vec<String> {
        self.cleanup_expired_at(Utc::now()).await
    }

    /// Reap every live session whose `expires_at` is before `now`.
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let candidates: Vec<String> = self
            .contexts
            .iter()
            .filter(|entry| now > entry.expires_at)
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = Vec::with_capacity(candidates.len());
        for session_id in candidates {
            let Some((_, ctx)) = self
                .contexts
                .remove_if(&session_id, |_, ctx| now > ctx.expires_at)
            else {
                continue;
            };
            warn!(session_id = %session_id, expires_at = %ctx.expires_at, "session expired");
            self.teardown(&session_id, ctx).await;

            match self.update_status(&session_id, ShellStatus::Disconnected).await {
                Ok(true) => {
                    if let Err(e) = self.store.set_error(&session_id, SESSION_EXPIRED).await {
                        warn!(session_id = %session_id, error = %e, "failed to record expiry");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(session_id = %session_id, error = %e, "failed to record expiry"),
            }
            self.publisher
                .status(&session_id, ShellStatus::Disconnected, SESSION_EXPIRED)
                .await;
            reaped.push(session_id);
        }

        if !reaped.is_empty() {
            info!(count = reaped.len(), "expiry sweep reaped sessions");
        }
        reaped
    }

    pub async fn session_info(&self, session_id: &str) -> ShellResult<ShellSessionInfo> {
        self.store
            .find(session_id)
            .await?
            .map(|s| s.to_info())
            .ok_or_else(|| ShellError::SessionNotFound(session_id.to_string()))
    }

    pub async fn list_sessions(&self, owner: &str) -> ShellResult<Vec<ShellSessionInfo>> {
        Ok(self
            .store
            .list_by_owner(owner)
            .await?
            .iter()
            .map(ShellSession::to_info)
            .collect())
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        self.contexts.contains_key(session_id)
    }

    pub fn live_count(&self) -> usize {
        self.contexts.len()
    }

    /// Close every live session (process shutdown).
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        for session_id in ids {
            if let Err(e) = self.close_with_reason(&session_id, "server shutting down").await {
                warn!(session_id = %session_id, error = %e, "failed to close session on shutdown");
            }
        }
    }
}

/// Routes one session's PTY output to its topic.
struct SessionOutput {
    session_id: String,
    publisher: ShellPublisher,
    manager: Weak<ShellSessionManager>,
}

#[async_trait]
impl ShellOutputHandler for SessionOutput {
    async fn on_output(&self, chunk: String) {
        self.publisher.output(&self.session_id, chunk).await;
    }

    async fn on_exit(&self, exit: ShellExit) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let session_id = self.session_id.clone();
        // Closing joins the reader task, which is the task running this.
        tokio::spawn(async move {
            manager.on_shell_exit(&session_id, exit).await;
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::MessageBroker;
    use crate::config::PtySpec;
    use crate::session::model::Credential;
    use crate::session::store::{MemoryStore, SessionStore};
    use crate::ssh::transport::testing::{EchoTransport, RemoteEvent};
    use chrono::Duration as ChronoDuration;
    use secrecy::SecretString;
    use shellgate_core::{shell_topic, OutputMessage, StompFrame};
    use tokio::sync::mpsc;

    pub(crate) struct Harness {
        pub manager: Arc<ShellSessionManager>,
        pub store: Arc<MemoryStore>,
        pub broker: Arc<MessageBroker>,
    }

    pub(crate) fn harness_with(max_sessions: usize) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let (broker, _events) = MessageBroker::new();
        let broker = Arc::new(broker);
        let executor =
            ShellExecutor::new(PtySpec::default(), Duration::ZERO, Duration::from_secs(2));
        let manager = Arc::new(ShellSessionManager::new(
            store.clone(),
            executor,
            ShellPublisher::new(broker.clone()),
            Duration::from_secs(3600),
            max_sessions,
        ));
        Harness {
            manager,
            store,
            broker,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(100)
    }

    pub(crate) fn demo_params() -> ConnectParams {
        ConnectParams {
            host: "10.0.0.5".into(),
            port: 22,
            username: "demo".into(),
            credential: Credential::Password {
                password: SecretString::from("secret".to_string()),
            },
        }
    }

    /// Create and attach a session over an echo transport.
    pub(crate) async fn connected(h: &Harness) -> (String, Arc<EchoTransport>) {
        let session = h.manager.create_session(demo_params(), "alice").await.unwrap();
        let id = session.session_id;
        h.manager.take_pending(&id).unwrap();
        let echo = Arc::new(EchoTransport::new());
        let transport: Arc<dyn ShellTransport> = echo.clone();
        let execution = h
            .manager
            .executor()
            .open(&transport, h.manager.output_handler(&id))
            .await
            .unwrap();
        assert!(h.manager.attach(&id, transport, execution).await.unwrap());
        (id, echo)
    }

    fn subscribe(h: &Harness, id: &str) -> mpsc::Receiver<StompFrame> {
        let (tx, rx) = mpsc::channel(64);
        h.broker.connect("browser", tx);
        h.broker.subscribe("browser", "sub-0", &shell_topic(id));
        rx
    }

    async fn next_message(rx: &mut mpsc::Receiver<StompFrame>) -> OutputMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no message")
            .expect("queue closed");
        serde_json::from_slice(&frame.body).unwrap()
    }

    async fn status(h: &Harness, id: &str) -> ShellStatus {
        h.manager.session_info(id).await.unwrap().status
    }

    #[tokio::test]
    async fn demo_scenario() {
        let h = harness();
        let before = Utc::now();
        let session = h.manager.create_session(demo_params(), "alice").await.unwrap();
        let id = session.session_id.clone();
        assert_eq!(session.status, ShellStatus::Connecting);
        let ttl = session.expires_at - before;
        assert!(ttl >= ChronoDuration::minutes(60) && ttl < ChronoDuration::minutes(61));

        h.manager.take_pending(&id).unwrap();
        let echo = Arc::new(EchoTransport::new());
        let transport: Arc<dyn ShellTransport> = echo.clone();
        let execution = h
            .manager
            .executor()
            .open(&transport, h.manager.output_handler(&id))
            .await
            .unwrap();
        assert!(h.manager.attach(&id, transport, execution).await.unwrap());
        assert_eq!(status(&h, &id).await, ShellStatus::Connected);

        let before_write = h.manager.session_info(&id).await.unwrap().last_activity_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.manager.write(&id, b"ls\r").await.unwrap();
        let info = h.manager.session_info(&id).await.unwrap();
        assert_eq!(info.command_count, 1);
        assert!(info.last_activity_at > before_write);

        // Keystrokes without a carriage return are not commands.
        h.manager.write(&id, b"\x1b[A").await.unwrap();
        assert_eq!(h.manager.session_info(&id).await.unwrap().command_count, 1);

        h.manager.close(&id).await.unwrap();
        let info = h.manager.session_info(&id).await.unwrap();
        assert_eq!(info.status, ShellStatus::Disconnected);
        assert!(info.disconnected_at.is_some());
        assert!(!h.manager.is_live(&id));
        assert_eq!(echo.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);

        h.manager.close(&id).await.unwrap();
        assert_eq!(status(&h, &id).await, ShellStatus::Disconnected);
        assert_eq!(echo.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn output_reaches_topic_in_order() {
        let h = harness();
        let (id, _echo) = connected(&h).await;
        let mut rx = subscribe(&h, &id);

        let keys = ["e", "c", "h", "o", " ", "h", "i", "\r"];
        for k in keys {
            h.manager.write(&id, k.as_bytes()).await.unwrap();
        }
        let mut seen = String::new();
        while seen.len() < keys.concat().len() {
            let msg = next_message(&mut rx).await;
            seen.push_str(msg.data.as_deref().unwrap_or_default());
        }
        assert_eq!(seen, keys.concat());
    }

    #[tokio::test]
    async fn write_rejected_unless_connected() {
        let h = harness();
        let session = h.manager.create_session(demo_params(), "alice").await.unwrap();
        let err = h
            .manager
            .write(&session.session_id, b"ls\r")
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::NotConnected(_)));

        let err = h.manager.write("shell_unknown", b"x").await.unwrap_err();
        assert!(matches!(err, ShellError::SessionNotFound(_)));

        // Rejections leave the row untouched.
        let info = h.manager.session_info(&session.session_id).await.unwrap();
        assert_eq!(info.status, ShellStatus::Connecting);
        assert_eq!(info.command_count, 0);
    }

    #[tokio::test]
    async fn write_failure_marks_error_and_force_closes() {
        let h = harness();
        let session = h.manager.create_session(demo_params(), "alice").await.unwrap();
        let id = session.session_id;
        let mut rx = subscribe(&h, &id);
        h.manager.take_pending(&id).unwrap();

        let echo = Arc::new(EchoTransport::with_broken_input());
        let transport: Arc<dyn ShellTransport> = echo.clone();
        let execution = h
            .manager
            .executor()
            .open(&transport, h.manager.output_handler(&id))
            .await
            .unwrap();
        h.manager.attach(&id, transport, execution).await.unwrap();

        let err = h.manager.write(&id, b"ls\r").await.unwrap_err();
        assert!(matches!(err, ShellError::ShellIo(_)));

        let info = h.manager.session_info(&id).await.unwrap();
        assert_eq!(info.status, ShellStatus::Error);
        assert!(info.error_message.is_some());
        assert!(!h.manager.is_live(&id));
        assert_eq!(echo.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);

        let msg = next_message(&mut rx).await;
        assert_eq!(msg.kind, shellgate_core::MessageKind::Error);

        // ERROR is terminal: a later close does not overwrite it.
        h.manager.close(&id).await.unwrap();
        assert_eq!(status(&h, &id).await, ShellStatus::Error);
    }

    #[tokio::test]
    async fn lifecycle_is_monotonic() {
        let h = harness();
        let (id, _echo) = connected(&h).await;
        assert!(!h.manager.update_status(&id, ShellStatus::Connecting).await.unwrap());
        assert!(h.manager.update_error_message(&id, "boom").await.unwrap());
        assert!(!h.manager.update_status(&id, ShellStatus::Connected).await.unwrap());
        assert!(!h.manager.update_status(&id, ShellStatus::Disconnected).await.unwrap());
        assert!(!h.manager.update_error_message(&id, "again").await.unwrap());

        let info = h.manager.session_info(&id).await.unwrap();
        assert_eq!(info.status, ShellStatus::Error);
        assert_eq!(info.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn expiry_sweep_and_attach_after_expiry() {
        let h = harness();
        let (live_id, echo) = connected(&h).await;
        let pending = h.manager.create_session(demo_params(), "bob").await.unwrap();
        let pending_id = pending.session_id;

        // Nothing is due yet.
        assert!(h.manager.cleanup_expired().await.is_empty());

        let later = Utc::now() + ChronoDuration::minutes(61);
        let mut reaped = h.manager.cleanup_expired_at(later).await;
        reaped.sort();
        let mut expected = vec![live_id.clone(), pending_id.clone()];
        expected.sort();
        assert_eq!(reaped, expected);

        for id in [&live_id, &pending_id] {
            assert!(!h.manager.is_live(id));
            let info = h.manager.session_info(id).await.unwrap();
            assert_eq!(info.status, ShellStatus::Disconnected);
            assert_eq!(info.error_message.as_deref(), Some(SESSION_EXPIRED));
        }
        assert_eq!(echo.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);

        // A late attach for the reaped session is a no-op.
        let late: Arc<dyn ShellTransport> = Arc::new(EchoTransport::new());
        let execution = h
            .manager
            .executor()
            .open(&late, h.manager.output_handler(&pending_id))
            .await
            .unwrap();
        assert!(!h
            .manager
            .attach(&pending_id, late, execution.clone())
            .await
            .unwrap());
        assert!(!h.manager.is_live(&pending_id));
        assert_eq!(status(&h, &pending_id).await, ShellStatus::Disconnected);
        h.manager.executor().close(&execution).await;
    }

    #[tokio::test]
    async fn remote_exit_closes_session() {
        let h = harness();
        let (id, echo) = connected(&h).await;
        echo.remote(RemoteEvent::Exit);

        for _ in 0..100 {
            if !h.manager.is_live(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.manager.is_live(&id));
        assert_eq!(status(&h, &id).await, ShellStatus::Disconnected);
    }

    #[tokio::test]
    async fn read_failure_marks_error() {
        let h = harness();
        let (id, echo) = connected(&h).await;
        echo.remote(RemoteEvent::Fail("connection reset by peer".into()));

        for _ in 0..100 {
            if status(&h, &id).await == ShellStatus::Error && !h.manager.is_live(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let info = h.manager.session_info(&id).await.unwrap();
        assert_eq!(info.status, ShellStatus::Error);
        assert!(info
            .error_message
            .unwrap_or_default()
            .contains("connection reset by peer"));
        assert!(!h.manager.is_live(&id));
    }

    #[tokio::test]
    async fn capacity_limit() {
        let h = harness_with(1);
        h.manager.create_session(demo_params(), "alice").await.unwrap();
        let err = h
            .manager
            .create_session(demo_params(), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::InvalidState(ref m) if m == "max sessions reached"));
    }

    #[tokio::test]
    async fn pending_credentials_are_single_use() {
        let h = harness();
        let session = h.manager.create_session(demo_params(), "alice").await.unwrap();
        assert!(h.manager.take_pending(&session.session_id).is_ok());
        assert!(matches!(
            h.manager.take_pending(&session.session_id),
            Err(ShellError::InvalidState(_))
        ));
        assert!(matches!(
            h.manager.take_pending("nope"),
            Err(ShellError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_sessions_by_owner() {
        let h = harness();
        h.manager.create_session(demo_params(), "alice").await.unwrap();
        h.manager.create_session(demo_params(), "bob").await.unwrap();
        let alice = h.manager.list_sessions("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].owner_identity, "alice");
        assert_eq!(h.store.list_by_owner("bob").await.unwrap().len(), 1);
    }
}
