//! Shell orchestration: the operations behind the HTTP routes and the
//! `/app/shell/{id}/...` destinations.

use super::ShellPublisher;
use crate::bus::MessageBroker;
use crate::relay::{BusinessType, SessionRegistry, TransportSessionMetadata};
use crate::session::model::{ConnectParams, ConnectRequest};
use crate::session::ShellSessionManager;
use crate::ssh::SshConnector;
use shellgate_core::{
    shell_command_destination, shell_connect_destination, shell_topic, ConnectResponse, ErrorKind,
    ShellError, ShellResult, ShellSessionInfo, ShellStatus, SHELL_WEBSOCKET_PATH,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ShellService {
    manager: Arc<ShellSessionManager>,
    registry: Arc<SessionRegistry>,
    broker: Arc<MessageBroker>,
    connector: Arc<dyn SshConnector>,
    publisher: ShellPublisher,
}

impl ShellService {
    pub fn new(
        manager: Arc<ShellSessionManager>,
        registry: Arc<SessionRegistry>,
        broker: Arc<MessageBroker>,
        connector: Arc<dyn SshConnector>,
        publisher: ShellPublisher,
    ) -> Self {
        Self {
            manager,
            registry,
            broker,
            connector,
            publisher,
        }
    }

    /// Create a CONNECTING session and tell the client where to attach.
    pub async fn connect(&self, request: ConnectRequest, owner: &str) -> ShellResult<ConnectResponse> {
        let params = request.into_params()?;
        let session = self.manager.create_session(params, owner).await?;
        let id = &session.session_id;
        Ok(ConnectResponse {
            session_id: id.clone(),
            status: session.status,
            host: session.host.clone(),
            websocket_url: SHELL_WEBSOCKET_PATH.to_string(),
            subscribe_topic: shell_topic(id).full_path(),
            command_destination: shell_command_destination(id).full_path(),
            connect_destination: shell_connect_destination(id).full_path(),
            created_at: session.created_at,
            expires_at: session.expires_at,
        })
    }

    /// Bind `connection_id` to the session and bring the remote shell up.
    pub async fn open_shell(&self, connection_id: &str, session_id: &str) -> ShellResult<()> {
        let params = self.claim(connection_id, session_id).await?;
        self.open_claimed(connection_id, session_id, params).await
    }

    /// Take the session's connect parameters and register `connection_id`
    /// as its owner. Nothing is changed when the request is rejected.
    ///
    /// Runs inline on the socket loop so the registry entry exists before
    /// that socket can report its disconnect.
    pub async fn claim(&self, connection_id: &str, session_id: &str) -> ShellResult<ConnectParams> {
        if !self.manager.is_live(session_id) {
            return Err(ShellError::SessionNotFound(session_id.to_string()));
        }
        if !self.broker.is_connected(connection_id) {
            return Err(ShellError::NotConnected(format!(
                "connection {connection_id} is closed"
            )));
        }
        let params = self.manager.take_pending(session_id)?;

        if let Some(stale) = self
            .registry
            .register(TransportSessionMetadata::new(
                connection_id,
                session_id,
                BusinessType::Shell,
            ))
            .await
        {
            info!(session_id, stale_connection = %stale.connection_id, "session moved to a new connection");
        }
        Ok(params)
    }

    /// Second half of [`open_shell`](Self::open_shell): SSH connect, PTY
    /// open and attach for a session already claimed by `connection_id`.
    pub async fn open_claimed(
        &self,
        connection_id: &str,
        session_id: &str,
        params: ConnectParams,
    ) -> ShellResult<()> {
        let transport = match self.connector.connect(&params).await {
            Ok(transport) => transport,
            Err(e) => {
                self.manager
                    .fail(session_id, &format!("SSH connection failed: {e}"))
                    .await;
                return Err(e);
            }
        };
        drop(params);

        let handler = self.manager.output_handler(session_id);
        let execution = match self.manager.executor().open(&transport, handler).await {
            Ok(execution) => execution,
            Err(e) => {
                transport.disconnect().await;
                self.manager
                    .fail(session_id, &format!("failed to open shell: {e}"))
                    .await;
                return Err(e);
            }
        };

        match self
            .manager
            .attach(session_id, transport.clone(), execution.clone())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.manager.executor().close(&execution).await;
                transport.disconnect().await;
                return Err(ShellError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => {
                self.manager.executor().close(&execution).await;
                transport.disconnect().await;
                return Err(e);
            }
        }

        // The socket may have gone between claim and attach; its disconnect
        // event then found nothing to close.
        if !self.broker.is_connected(connection_id) {
            warn!(session_id, connection_id, "client left while the shell was opening");
            self.manager
                .close_with_reason(session_id, "client connection lost")
                .await?;
            return Err(ShellError::NotConnected(format!(
                "connection {connection_id} closed while opening session {session_id}"
            )));
        }

        self.publisher
            .status(
                session_id,
                ShellStatus::Connected,
                format!("connected to {}", transport.describe()),
            )
            .await;
        Ok(())
    }

    /// Forward one input event. Rejections are also reported on the
    /// session topic so the terminal can show them.
    pub async fn send_command(&self, session_id: &str, input: &[u8]) -> ShellResult<()> {
        match self.manager.write(session_id, input).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Broken PTYs already published ERROR via `fail`.
                if e.kind() == ErrorKind::Usage {
                    self.publisher.error(session_id, e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self, session_id: &str) -> ShellResult<()> {
        self.manager.close(session_id).await
    }

    pub async fn session_info(&self, session_id: &str) -> ShellResult<ShellSessionInfo> {
        self.manager.session_info(session_id).await
    }

    pub async fn list_sessions(&self, owner: &str) -> ShellResult<Vec<ShellSessionInfo>> {
        self.manager.list_sessions(owner).await
    }

    /// Run one expiry sweep and drop registry entries of reaped sessions.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let reaped = self.manager.cleanup_expired_at(now).await;
        for session_id in &reaped {
            if let Some(connection_id) = self.registry.connection_for(session_id).await {
                if self.registry.unregister(&connection_id).await.is_none() {
                    warn!(session_id = %session_id, "registry entry vanished during sweep");
                }
            }
        }
        if !reaped.is_empty() {
            let live = self.manager.live_count();
            let bound = self.registry.count_by_type(BusinessType::Shell).await;
            let sockets = self.broker.connection_count();
            info!(
                reaped = reaped.len(),
                live = live,
                bound = bound,
                sockets = sockets,
                "expiry sweep finished"
            );
        }
        reaped.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crate::relay::{TransportEventRelay, TransportSessionListener};
    use crate::session::manager::tests::{harness, Harness};
    use crate::shell::ShellTransportListener;
    use crate::session::model::{ConnectParams, Credential};
    use crate::ssh::transport::testing::EchoTransport;
    use crate::ssh::ShellTransport;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use shellgate_core::{MessageKind, OutputMessage, StompFrame};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Hands out echo transports, or fails for usernames starting with `bad`.
    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub transports: Mutex<Vec<Arc<EchoTransport>>>,
    }

    #[async_trait]
    impl SshConnector for FakeConnector {
        async fn connect(&self, params: &ConnectParams) -> ShellResult<Arc<dyn ShellTransport>> {
            if params.username.starts_with("bad") {
                return Err(ShellError::AuthFailed(format!(
                    "{}@{}",
                    params.username, params.host
                )));
            }
            let echo = Arc::new(EchoTransport::new());
            self.transports.lock().unwrap().push(echo.clone());
            Ok(echo)
        }
    }

    pub(crate) fn service(h: &Harness) -> (Arc<ShellService>, Arc<SessionRegistry>, Arc<FakeConnector>) {
        let registry = Arc::new(SessionRegistry::new());
        let connector = Arc::new(FakeConnector::default());
        let service = Arc::new(ShellService::new(
            h.manager.clone(),
            registry.clone(),
            h.broker.clone(),
            connector.clone(),
            ShellPublisher::new(h.broker.clone()),
        ));
        (service, registry, connector)
    }

    pub(crate) fn request(username: &str) -> ConnectRequest {
        ConnectRequest {
            host: "10.0.0.5".into(),
            port: 22,
            username: username.into(),
            credential_ref: Credential::Password {
                password: SecretString::from("secret".to_string()),
            },
        }
    }

    /// A client socket known to the broker; drop the receiver to keep it
    /// from filling.
    pub(crate) fn socket(h: &Harness, connection_id: &str) -> mpsc::Receiver<StompFrame> {
        let (tx, rx) = mpsc::channel(64);
        h.broker.connect(connection_id, tx);
        rx
    }

    fn subscribe(h: &Harness, id: &str) -> mpsc::Receiver<StompFrame> {
        let (tx, rx) = mpsc::channel(64);
        h.broker.connect("watcher", tx);
        h.broker.subscribe("watcher", "sub-0", &shell_topic(id));
        rx
    }

    async fn next_message(rx: &mut mpsc::Receiver<StompFrame>) -> OutputMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no message")
            .expect("queue closed");
        serde_json::from_slice(&frame.body).unwrap()
    }

    #[tokio::test]
    async fn connect_describes_destinations() {
        let h = harness();
        let (service, _, _) = service(&h);
        let response = service.connect(request("demo"), "alice").await.unwrap();
        let id = &response.session_id;
        assert_eq!(response.status, ShellStatus::Connecting);
        assert_eq!(response.subscribe_topic, format!("/topic/shell/{id}"));
        assert_eq!(response.command_destination, format!("/app/shell/{id}/command"));
        assert_eq!(response.connect_destination, format!("/app/shell/{id}/connect"));
        assert_eq!(response.websocket_url, "/ws/shell");
    }

    #[tokio::test]
    async fn connect_rejects_bad_port() {
        let h = harness();
        let (service, _, _) = service(&h);
        let mut req = request("demo");
        req.port = 70_000;
        let err = service.connect(req, "alice").await.unwrap_err();
        assert!(matches!(err, ShellError::InvalidRequest(_)));
        assert_eq!(h.manager.live_count(), 0);
    }

    #[tokio::test]
    async fn open_shell_then_type() {
        let h = harness();
        let (service, registry, connector) = service(&h);
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;
        let mut rx = subscribe(&h, &id);
        let _sock = socket(&h, "conn-1");

        service.open_shell("conn-1", &id).await.unwrap();
        assert_eq!(registry.connection_for(&id).await.as_deref(), Some("conn-1"));
        let msg = next_message(&mut rx).await;
        assert_eq!(msg.kind, MessageKind::Status);
        assert_eq!(msg.status, Some(ShellStatus::Connected));

        service.send_command(&id, b"pwd\r").await.unwrap();
        let msg = next_message(&mut rx).await;
        assert_eq!(msg.kind, MessageKind::Output);
        assert_eq!(msg.data.as_deref(), Some("pwd\r"));
        assert_eq!(service.session_info(&id).await.unwrap().command_count, 1);

        // Credentials are consumed by the first open.
        assert!(matches!(
            service.open_shell("conn-1", &id).await,
            Err(ShellError::InvalidState(_))
        ));

        service.disconnect(&id).await.unwrap();
        let transport = connector.transports.lock().unwrap()[0].clone();
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            service.session_info(&id).await.unwrap().status,
            ShellStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn auth_failure_marks_error() {
        let h = harness();
        let (service, _, _) = service(&h);
        let id = service.connect(request("bad-user"), "alice").await.unwrap().session_id;
        let mut rx = subscribe(&h, &id);
        let _sock = socket(&h, "conn-1");

        let err = service.open_shell("conn-1", &id).await.unwrap_err();
        assert!(matches!(err, ShellError::AuthFailed(_)));

        let info = service.session_info(&id).await.unwrap();
        assert_eq!(info.status, ShellStatus::Error);
        assert!(info.error_message.unwrap().contains("SSH connection failed"));
        assert!(!h.manager.is_live(&id));
        assert_eq!(next_message(&mut rx).await.kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn command_before_open_is_reported() {
        let h = harness();
        let (service, _, _) = service(&h);
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;
        let mut rx = subscribe(&h, &id);

        let err = service.send_command(&id, b"ls\r").await.unwrap_err();
        assert!(matches!(err, ShellError::NotConnected(_)));
        let msg = next_message(&mut rx).await;
        assert_eq!(msg.kind, MessageKind::Error);
        assert_eq!(
            service.session_info(&id).await.unwrap().status,
            ShellStatus::Connecting
        );
    }

    #[tokio::test]
    async fn open_unknown_session() {
        let h = harness();
        let (service, registry, _) = service(&h);
        let err = service.open_shell("conn-1", "shell_missing").await.unwrap_err();
        assert!(matches!(err, ShellError::SessionNotFound(_)));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn sweep_drops_registry_entries() {
        let h = harness();
        let (service, registry, _) = service(&h);
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;
        let _sock = socket(&h, "conn-1");
        service.open_shell("conn-1", &id).await.unwrap();
        assert_eq!(service.sweep().await, 0);
        assert_eq!(registry.count().await, 1);

        let later = Utc::now() + chrono::Duration::minutes(61);
        assert_eq!(service.sweep_at(later).await, 1);
        assert!(!h.manager.is_live(&id));
        assert!(registry.connection_for(&id).await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn rejected_open_keeps_owner() {
        let h = harness();
        let (service, registry, connector) = service(&h);
        let relay = TransportEventRelay::new(
            registry.clone(),
            vec![Arc::new(ShellTransportListener::new(h.manager.clone()))
                as Arc<dyn TransportSessionListener>],
        );
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;
        let _first = socket(&h, "conn-1");
        let _second = socket(&h, "conn-2");
        service.open_shell("conn-1", &id).await.unwrap();

        assert!(matches!(
            service.open_shell("conn-2", &id).await,
            Err(ShellError::InvalidState(_))
        ));
        assert_eq!(registry.connection_for(&id).await.as_deref(), Some("conn-1"));
        assert!(registry.lookup("conn-2").await.is_none());

        // The owning socket going away still closes the shell.
        h.broker.disconnect("conn-1");
        relay
            .handle(BusEvent::Disconnected {
                connection_id: "conn-1".into(),
            })
            .await;
        assert!(!h.manager.is_live(&id));
        assert_eq!(
            service.session_info(&id).await.unwrap().status,
            ShellStatus::Disconnected
        );
        let transport = connector.transports.lock().unwrap()[0].clone();
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_from_closed_socket_is_refused() {
        let h = harness();
        let (service, registry, connector) = service(&h);
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;

        let err = service.open_shell("conn-1", &id).await.unwrap_err();
        assert!(matches!(err, ShellError::NotConnected(_)));
        assert!(registry.connection_for(&id).await.is_none());
        assert!(connector.transports.lock().unwrap().is_empty());

        // Credentials were not consumed; a live socket can still open it.
        let _sock = socket(&h, "conn-2");
        service.open_shell("conn-2", &id).await.unwrap();
        assert_eq!(
            service.session_info(&id).await.unwrap().status,
            ShellStatus::Connected
        );
    }

    #[tokio::test]
    async fn socket_lost_while_opening_closes_shell() {
        let h = harness();
        let (service, registry, connector) = service(&h);
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;
        let sock = socket(&h, "conn-1");

        let params = service.claim("conn-1", &id).await.unwrap();
        assert_eq!(registry.connection_for(&id).await.as_deref(), Some("conn-1"));

        // Gone before the SSH side comes up, and nobody relayed the event.
        drop(sock);
        h.broker.disconnect("conn-1");

        let err = service.open_claimed("conn-1", &id, params).await.unwrap_err();
        assert!(matches!(err, ShellError::NotConnected(_)));
        assert!(!h.manager.is_live(&id));
        assert_eq!(
            service.session_info(&id).await.unwrap().status,
            ShellStatus::Disconnected
        );
        let transport = connector.transports.lock().unwrap()[0].clone();
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn socket_lost_after_claim_is_relayed() {
        let h = harness();
        let (service, registry, connector) = service(&h);
        let relay = TransportEventRelay::new(
            registry.clone(),
            vec![Arc::new(ShellTransportListener::new(h.manager.clone()))
                as Arc<dyn TransportSessionListener>],
        );
        let id = service.connect(request("demo"), "alice").await.unwrap().session_id;
        let _sock = socket(&h, "conn-1");
        let params = service.claim("conn-1", &id).await.unwrap();

        h.broker.disconnect("conn-1");
        relay
            .handle(BusEvent::Disconnected {
                connection_id: "conn-1".into(),
            })
            .await;
        assert!(!h.manager.is_live(&id));

        assert!(service.open_claimed("conn-1", &id, params).await.is_err());
        assert_eq!(
            service.session_info(&id).await.unwrap().status,
            ShellStatus::Disconnected
        );
        let transport = connector.transports.lock().unwrap()[0].clone();
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }
}
