//! Message-bus destination naming.
//!
//! `/topic` and `/queue` are broker destinations (server → client);
//! `/app` destinations are routed to application endpoints (client → server).

use crate::error::{ShellError, ShellResult};
use std::fmt;

const TOPIC_PREFIX: &str = "/topic/";
const QUEUE_PREFIX: &str = "/queue/";
const USER_PREFIX: &str = "/user/";
const APP_PREFIX: &str = "/app/";

/// A broker or application destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Broadcast topic (`/topic/...`).
    Topic(String),
    /// Point-to-point queue (`/queue/...`).
    Queue(String),
    /// User-specific destination (`/user/...`).
    User(String),
    /// Application endpoint (`/app/...`).
    App(String),
}

impl Destination {
    pub fn topic(path: impl Into<String>) -> Self {
        Destination::Topic(path.into())
    }

    pub fn app(path: impl Into<String>) -> Self {
        Destination::App(path.into())
    }

    /// Path without its prefix.
    pub fn path(&self) -> &str {
        match self {
            Destination::Topic(p)
            | Destination::Queue(p)
            | Destination::User(p)
            | Destination::App(p) => p,
        }
    }

    pub fn full_path(&self) -> String {
        match self {
            Destination::Topic(p) => format!("{TOPIC_PREFIX}{p}"),
            Destination::Queue(p) => format!("{QUEUE_PREFIX}{p}"),
            Destination::User(p) => format!("{USER_PREFIX}{p}"),
            Destination::App(p) => format!("{APP_PREFIX}{p}"),
        }
    }

    pub fn parse(full: &str) -> ShellResult<Self> {
        let (ctor, rest): (fn(String) -> Destination, &str) =
            if let Some(rest) = full.strip_prefix(TOPIC_PREFIX) {
                (Destination::Topic, rest)
            } else if let Some(rest) = full.strip_prefix(QUEUE_PREFIX) {
                (Destination::Queue, rest)
            } else if let Some(rest) = full.strip_prefix(USER_PREFIX) {
                (Destination::User, rest)
            } else if let Some(rest) = full.strip_prefix(APP_PREFIX) {
                (Destination::App, rest)
            } else {
                return Err(ShellError::InvalidRequest(format!(
                    "unsupported destination: {full}"
                )));
            };
        if rest.is_empty() {
            return Err(ShellError::InvalidRequest(format!(
                "empty destination path: {full}"
            )));
        }
        Ok(ctor(rest.to_string()))
    }

    /// Whether clients may subscribe to this destination.
    pub fn is_subscribable(&self) -> bool {
        !matches!(self, Destination::App(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

/// WebSocket endpoint path clients connect to.
pub const SHELL_WEBSOCKET_PATH: &str = "/ws/shell";

/// `/topic/shell/{id}`: output, status and error envelopes for one session.
pub fn shell_topic(session_id: &str) -> Destination {
    Destination::topic(format!("shell/{session_id}"))
}

/// `/app/shell/{id}/command`: keystrokes for one session.
pub fn shell_command_destination(session_id: &str) -> Destination {
    Destination::app(format!("shell/{session_id}/command"))
}

/// `/app/shell/{id}/connect`: asks the gateway to open the remote shell.
pub fn shell_connect_destination(session_id: &str) -> Destination {
    Destination::app(format!("shell/{session_id}/connect"))
}

/// A decoded `/app/shell/{id}/{action}` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellRoute {
    Connect { session_id: String },
    Command { session_id: String },
    Disconnect { session_id: String },
}

impl ShellRoute {
    /// Decode an application destination. Returns `None` for non-shell paths.
    pub fn parse(destination: &Destination) -> Option<Self> {
        let Destination::App(path) = destination else {
            return None;
        };
        let rest = path.strip_prefix("shell/")?;
        let (session_id, action) = rest.rsplit_once('/')?;
        if session_id.is_empty() || session_id.contains('/') {
            return None;
        }
        let session_id = session_id.to_string();
        match action {
            "connect" => Some(ShellRoute::Connect { session_id }),
            "command" => Some(ShellRoute::Command { session_id }),
            "disconnect" => Some(ShellRoute::Disconnect { session_id }),
            _ => None,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ShellRoute::Connect { session_id }
            | ShellRoute::Command { session_id }
            | ShellRoute::Disconnect { session_id } => session_id,
        }
    }
}
