//! STOMP-over-WebSocket front end.
//!
//! Accepts WebSocket connections on [`SHELL_WEBSOCKET_PATH`] and runs one
//! STOMP session per socket. However a socket ends (DISCONNECT frame, close
//! frame, protocol error or a dropped TCP connection), the session finishes
//! with `MessageBroker::disconnect`, so the relay always sees the same
//! `Disconnected` event.

use super::broker::{MessageBroker, OUTBOUND_QUEUE_SIZE};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use shellgate_core::{
    Destination, FrameDecoder, ShellError, ShellResult, StompCommand, StompFrame,
    SHELL_WEBSOCKET_PATH,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

const STOMP_SUBPROTOCOL: &str = "v12.stomp";

/// How long a closing session waits for its outbound queue to drain.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives SEND frames addressed to `/app/...` destinations.
#[async_trait]
pub trait AppDestinationHandler: Send + Sync {
    async fn on_send(
        &self,
        connection_id: &str,
        destination: &Destination,
        body: Vec<u8>,
    ) -> ShellResult<()>;
}

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns a receiver that yields accepted connections. Upgrades on any
/// path other than [`SHELL_WEBSOCKET_PATH`] are refused with 404.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> ShellResult<mpsc::Receiver<WebSocketConnection>> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ShellError::Transport(format!("WS bind failed: {e}")))?;

    info!(addr = %bind_addr, path = SHELL_WEBSOCKET_PATH, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_hdr_async(stream, check_upgrade).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

#[allow(clippy::result_large_err)]
fn check_upgrade(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() != SHELL_WEBSOCKET_PATH {
        let mut refused = ErrorResponse::new(Some(format!(
            "no WebSocket endpoint at {}",
            request.uri().path()
        )));
        *refused.status_mut() = StatusCode::NOT_FOUND;
        return Err(refused);
    }

    let offers_stomp = request
        .headers()
        .get_all("Sec-WebSocket-Protocol")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == STOMP_SUBPROTOCOL);
    if offers_stomp {
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(STOMP_SUBPROTOCOL),
        );
    }
    Ok(response)
}

enum Flow {
    Continue,
    Close,
}

/// Per-socket STOMP state.
struct StompSession {
    connection_id: String,
    broker: Arc<MessageBroker>,
    handler: Arc<dyn AppDestinationHandler>,
    outbound: mpsc::Sender<StompFrame>,
    connected: bool,
}

impl StompSession {
    async fn reply(&self, frame: StompFrame) {
        if self.outbound.send(frame).await.is_err() {
            debug!(connection_id = %self.connection_id, "reply dropped, writer gone");
        }
    }

    async fn protocol_error(&self, message: &str, detail: String) -> Flow {
        warn!(connection_id = %self.connection_id, error = message, detail = %detail, "STOMP protocol error");
        self.reply(
            StompFrame::new(StompCommand::Error)
                .header("message", message)
                .header("content-type", "text/plain")
                .with_body(detail.into_bytes()),
        )
        .await;
        Flow::Close
    }

    async fn handle(&mut self, frame: StompFrame) -> Flow {
        if !self.connected && !matches!(frame.command, StompCommand::Connect | StompCommand::Stomp) {
            return self
                .protocol_error("not connected", format!("expected CONNECT, got {}", frame.command.as_str()))
                .await;
        }

        let flow = match frame.command {
            StompCommand::Connect | StompCommand::Stomp => self.on_connect(&frame).await,
            StompCommand::Subscribe => self.on_subscribe(&frame).await,
            StompCommand::Unsubscribe => match frame.get("id") {
                Some(id) => {
                    self.broker.unsubscribe(&self.connection_id, id);
                    Flow::Continue
                }
                None => {
                    self.protocol_error("missing header", "UNSUBSCRIBE requires id".into())
                        .await
                }
            },
            StompCommand::Send => self.on_send(frame.clone()).await,
            StompCommand::Disconnect => {
                if let Some(receipt) = frame.get("receipt") {
                    self.reply(StompFrame::new(StompCommand::Receipt).header("receipt-id", receipt))
                        .await;
                }
                debug!(connection_id = %self.connection_id, "client sent DISCONNECT");
                return Flow::Close;
            }
            // No client acks or transactions: accepted and ignored.
            StompCommand::Ack
            | StompCommand::Nack
            | StompCommand::Begin
            | StompCommand::Commit
            | StompCommand::Abort => Flow::Continue,
            StompCommand::Connected
            | StompCommand::Message
            | StompCommand::Receipt
            | StompCommand::Error => {
                self.protocol_error(
                    "unexpected frame",
                    format!("{} is a server frame", frame.command.as_str()),
                )
                .await
            }
        };

        if let (Flow::Continue, Some(receipt)) = (&flow, frame.get("receipt")) {
            self.reply(StompFrame::new(StompCommand::Receipt).header("receipt-id", receipt))
                .await;
        }
        flow
    }

    async fn on_connect(&mut self, frame: &StompFrame) -> Flow {
        if self.connected {
            return self
                .protocol_error("already connected", "duplicate CONNECT".into())
                .await;
        }
        if let Some(versions) = frame.get("accept-version") {
            if !versions.split(',').any(|v| v.trim() == "1.2") {
                return self
                    .protocol_error(
                        "unsupported version",
                        format!("supported protocol versions are 1.2, client offered {versions}"),
                    )
                    .await;
            }
        }

        self.broker.connect(&self.connection_id, self.outbound.clone());
        self.connected = true;
        self.reply(
            StompFrame::new(StompCommand::Connected)
                .header("version", "1.2")
                .header("heart-beat", "0,0")
                .header("server", concat!("shellgate/", env!("CARGO_PKG_VERSION")))
                .header("session", self.connection_id.clone()),
        )
        .await;
        Flow::Continue
    }

    async fn on_subscribe(&mut self, frame: &StompFrame) -> Flow {
        let (Some(destination), Some(id)) = (frame.get("destination"), frame.get("id")) else {
            return self
                .protocol_error("missing header", "SUBSCRIBE requires destination and id".into())
                .await;
        };
        match Destination::parse(destination) {
            Ok(dest) if dest.is_subscribable() => {
                self.broker.subscribe(&self.connection_id, id, &dest);
                Flow::Continue
            }
            Ok(dest) => {
                self.protocol_error("invalid destination", format!("cannot subscribe to {dest}"))
                    .await
            }
            Err(e) => self.protocol_error("invalid destination", e.to_string()).await,
        }
    }

    async fn on_send(&mut self, frame: StompFrame) -> Flow {
        let Some(raw) = frame.get("destination") else {
            return self
                .protocol_error("missing header", "SEND requires destination".into())
                .await;
        };
        let destination = match Destination::parse(raw) {
            Ok(dest @ Destination::App(_)) => dest,
            Ok(dest) => {
                return self
                    .protocol_error("invalid destination", format!("cannot SEND to {dest}"))
                    .await
            }
            Err(e) => return self.protocol_error("invalid destination", e.to_string()).await,
        };

        if let Err(e) = self
            .handler
            .on_send(&self.connection_id, &destination, frame.body)
            .await
        {
            warn!(
                connection_id = %self.connection_id,
                destination = %destination,
                error = %e,
                "SEND not handled"
            );
        }
        Flow::Continue
    }
}

/// Run one STOMP session until the socket ends.
pub async fn serve_connection<S>(
    ws_stream: WebSocketStream<S>,
    broker: Arc<MessageBroker>,
    handler: Arc<dyn AppDestinationHandler>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<StompFrame>(OUTBOUND_QUEUE_SIZE);

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = frame.command == StompCommand::Error;
            let message = match String::from_utf8(frame.encode()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            };
            if let Err(e) = sink.send(message).await {
                debug!(connection_id = %writer_id, error = %e, "WS send failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = StompSession {
        connection_id: connection_id.clone(),
        broker: broker.clone(),
        handler,
        outbound,
        connected: false,
    };
    let mut decoder = FrameDecoder::new();

    'socket: while let Some(message) = stream.next().await {
        let bytes = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WS receive failed");
                break;
            }
        };

        let frames = match decoder.feed(&bytes) {
            Ok(frames) => frames,
            Err(e) => {
                session.protocol_error("malformed frame", e.to_string()).await;
                break;
            }
        };
        for frame in frames {
            if let Flow::Close = session.handle(frame).await {
                break 'socket;
            }
        }
    }

    if decoder.pending() > 0 {
        debug!(connection_id = %connection_id, bytes = decoder.pending(), "socket closed mid-frame");
    }
    broker.disconnect(&connection_id);
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(connection_id = %connection_id, "WS writer did not drain in time");
    }
    info!(connection_id = %connection_id, "STOMP session ended");
}
