//! Session data model: connect parameters, credentials and the audit row.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use shellgate_core::{ShellError, ShellResult, ShellSessionInfo, ShellStatus};
use std::path::PathBuf;
use std::time::Duration;

/// How to authenticate against the target host. Debug output is redacted.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Credential {
    Password {
        password: SecretString,
    },
    #[serde(rename_all = "camelCase")]
    PrivateKey {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<SecretString>,
    },
}

/// Everything needed to open the SSH transport for a session.
#[derive(Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

/// Body of `POST /api/shell/connect`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u32,
    pub username: String,
    pub credential_ref: Credential,
}

fn default_ssh_port() -> u32 {
    22
}

impl ConnectRequest {
    pub fn into_params(self) -> ShellResult<ConnectParams> {
        let port = u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                ShellError::InvalidRequest(format!(
                    "port must be between 1 and 65535, got {}",
                    self.port
                ))
            })?;
        Ok(ConnectParams {
            host: self.host.trim().to_string(),
            port,
            username: self.username,
            credential: self.credential_ref,
        })
    }
}

/// Persisted audit record for one shell session.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSession {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub owner_identity: String,
    pub status: ShellStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub command_count: u64,
    pub error_message: Option<String>,
}

impl ShellSession {
    /// A fresh CONNECTING row; `expires_at` is fixed at `now + ttl`.
    pub fn connecting(
        session_id: String,
        params: &ConnectParams,
        owner_identity: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        Self {
            session_id,
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            owner_identity: owner_identity.to_string(),
            status: ShellStatus::Connecting,
            created_at: now,
            last_activity_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            disconnected_at: None,
            command_count: 0,
            error_message: None,
        }
    }

    pub fn to_info(&self) -> ShellSessionInfo {
        ShellSessionInfo {
            session_id: self.session_id.clone(),
            status: self.status,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            owner_identity: self.owner_identity.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            expires_at: self.expires_at,
            disconnected_at: self.disconnected_at,
            command_count: self.command_count,
            error_message: self.error_message.clone(),
        }
    }
}

/// `shell_<yyyy-MM-ddTHH_mm_ss>_<8 hex>`.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    use rand::Rng;
    let bytes: [u8; 4] = rand::thread_rng().gen();
    format!(
        "shell_{}_{}",
        now.format("%Y-%m-%dT%H_%M_%S"),
        hex::encode(bytes)
    )
}
