//! Gateway assembly: builds the shared components and runs the listeners.
//!
//! One process hosts the HTTP API, the STOMP WebSocket endpoint, the
//! transport event relay and the expiry sweep, all sharing one session
//! manager and one registry.

use crate::bus::{websocket, AppDestinationHandler, BusEvent, MessageBroker};
use crate::config::ServerConfig;
use crate::http;
use crate::relay::{SessionRegistry, TransportEventRelay, TransportSessionListener};
use crate::session::{MemoryStore, SessionStore, ShellSessionManager, SqliteStore};
use crate::shell::{ShellEndpoint, ShellPublisher, ShellService, ShellTransportListener};
use crate::ssh::{RusshConnector, ShellExecutor};
use shellgate_core::{ShellError, ShellResult};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub struct ShellGateway {
    config: ServerConfig,
    broker: Arc<MessageBroker>,
    registry: Arc<SessionRegistry>,
    manager: Arc<ShellSessionManager>,
    service: Arc<ShellService>,
    events: mpsc::UnboundedReceiver<BusEvent>,
}

impl ShellGateway {
    pub async fn new(config: ServerConfig) -> ShellResult<Self> {
        let store: Arc<dyn SessionStore> = match &config.database_url {
            Some(url) => Arc::new(SqliteStore::connect(url).await?),
            None => {
                info!("no database configured, audit rows are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let (broker, events) = MessageBroker::new();
        let broker = Arc::new(broker);
        let publisher = ShellPublisher::new(broker.clone());
        let registry = Arc::new(SessionRegistry::new());

        let executor = ShellExecutor::new(
            config.pty.clone(),
            config.prompt_wait,
            config.close_timeout,
        );
        let manager = Arc::new(ShellSessionManager::new(
            store,
            executor,
            publisher.clone(),
            config.session_ttl,
            config.max_sessions,
        ));
        let connector = Arc::new(RusshConnector::new(
            config.connect_timeout,
            config.strict_host_key_checking,
        ));
        let service = Arc::new(ShellService::new(
            manager.clone(),
            registry.clone(),
            broker.clone(),
            connector,
            publisher,
        ));

        Ok(Self {
            config,
            broker,
            registry,
            manager,
            service,
            events,
        })
    }

    pub fn manager(&self) -> Arc<ShellSessionManager> {
        self.manager.clone()
    }

    fn addr(&self, port: u16) -> ShellResult<SocketAddr> {
        format!("{}:{port}", self.config.bind)
            .parse()
            .map_err(|e| ShellError::Config(format!("invalid bind address: {e}")))
    }

    /// Run until a listener fails. Sessions are not closed here; the
    /// caller does that on shutdown.
    pub async fn run(self) -> ShellResult<()> {
        let http_addr = self.addr(self.config.http_port)?;
        let ws_addr = self.addr(self.config.ws_port)?;

        let listeners: Vec<Arc<dyn TransportSessionListener>> =
            vec![Arc::new(ShellTransportListener::new(self.manager.clone()))];
        let relay = TransportEventRelay::new(self.registry.clone(), listeners);
        tokio::spawn(relay.run(self.events));

        let sweep_service = self.service.clone();
        let sweep_every = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                sweep_service.sweep().await;
            }
        });

        let mut ws_rx = websocket::start_listener(ws_addr).await?;
        let handler: Arc<dyn AppDestinationHandler> =
            Arc::new(ShellEndpoint::new(self.service.clone()));
        let broker = self.broker.clone();
        let ws_loop = async move {
            while let Some(conn) = ws_rx.recv().await {
                let broker = broker.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    info!(remote = %conn.remote_addr, "STOMP client connected");
                    websocket::serve_connection(conn.ws_stream, broker, handler).await;
                });
            }
            warn!("WebSocket listener closed");
        };

        let tcp = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| ShellError::Transport(format!("HTTP bind failed: {e}")))?;
        let app = http::router(self.service.clone());

        info!(
            http = %http_addr,
            ws = %ws_addr,
            max_sessions = self.config.max_sessions,
            ttl_secs = self.config.session_ttl.as_secs(),
            "shellgate ready"
        );

        tokio::select! {
            result = axum::serve(tcp, app).into_future() => {
                result.map_err(|e| ShellError::Transport(format!("HTTP server failed: {e}")))
            }
            _ = ws_loop => Ok(()),
        }
    }
}
