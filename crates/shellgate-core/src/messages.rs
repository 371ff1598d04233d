//! Wire types shared between the gateway and its clients.
//!
//! Everything published on `/topic/shell/{id}` is an [`OutputMessage`]
//! serialized as JSON. The `type` field (mirrored in the `message-kind`
//! STOMP header) tells terminal output apart from status and error signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// STOMP header carrying the envelope kind on every topic message.
pub const MESSAGE_KIND_HEADER: &str = "message-kind";

/// Lifecycle state of a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShellStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ShellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellStatus::Connecting => "CONNECTING",
            ShellStatus::Connected => "CONNECTED",
            ShellStatus::Disconnected => "DISCONNECTED",
            ShellStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONNECTING" => Some(ShellStatus::Connecting),
            "CONNECTED" => Some(ShellStatus::Connected),
            "DISCONNECTED" => Some(ShellStatus::Disconnected),
            "ERROR" => Some(ShellStatus::Error),
            _ => None,
        }
    }

    /// DISCONNECTED and ERROR accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShellStatus::Disconnected | ShellStatus::Error)
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: ShellStatus) -> bool {
        match (self, next) {
            (ShellStatus::Connecting, ShellStatus::Connected) => true,
            (ShellStatus::Connecting | ShellStatus::Connected, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ShellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator for topic envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Output,
    Status,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Output => "OUTPUT",
            MessageKind::Status => "STATUS",
            MessageKind::Error => "ERROR",
        }
    }
}

/// Envelope published to a session's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Terminal output (OUTPUT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// New session status (STATUS only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ShellStatus>,
    /// Human-readable status or error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutputMessage {
    pub fn output(data: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Output,
            data: Some(data.into()),
            status: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn status(status: ShellStatus, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Status,
            data: None,
            status: Some(status),
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            data: None,
            status: None,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Response to a create-session request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub session_id: String,
    pub status: ShellStatus,
    pub host: String,
    /// WebSocket endpoint path to open the STOMP connection on.
    pub websocket_url: String,
    /// Topic to subscribe to for output.
    pub subscribe_topic: String,
    /// Destination for keystrokes.
    pub command_destination: String,
    /// Destination that triggers opening the remote shell.
    pub connect_destination: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Authoritative state of a session, as returned by the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSessionInfo {
    pub session_id: String,
    pub status: ShellStatus,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub owner_identity: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    pub command_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Uniform HTTP response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
