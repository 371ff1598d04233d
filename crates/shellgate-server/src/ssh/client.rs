//! SSH client adapter built on russh.
//!
//! Produces authenticated [`ShellTransport`] handles. Host-key policy,
//! authentication and the connect timeout are handled here; everything
//! past that point only sees the trait.

use super::transport::{PtyChannel, PtyOutput, ShellTransport};
use crate::config::PtySpec;
use crate::session::model::{ConnectParams, Credential};
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use secrecy::ExposeSecret;
use shellgate_core::{ShellError, ShellResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens authenticated transports.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> ShellResult<Arc<dyn ShellTransport>>;
}

/// Reject obviously bad parameters before touching the network.
pub fn validate_params(params: &ConnectParams) -> ShellResult<()> {
    if params.host.trim().is_empty() {
        return Err(ShellError::InvalidRequest("host must not be blank".into()));
    }
    if params.port == 0 {
        return Err(ShellError::InvalidRequest(
            "port must be between 1 and 65535".into(),
        ));
    }
    if params.username.trim().is_empty() {
        return Err(ShellError::InvalidRequest("username must not be blank".into()));
    }
    match &params.credential {
        Credential::Password { password } if password.expose_secret().is_empty() => Err(
            ShellError::InvalidRequest("password must not be empty".into()),
        ),
        Credential::PrivateKey { path, .. } if path.as_os_str().is_empty() => Err(
            ShellError::InvalidRequest("private key path must not be empty".into()),
        ),
        _ => Ok(()),
    }
}

/// russh-backed connector.
pub struct RusshConnector {
    connect_timeout: Duration,
    strict_host_key_checking: bool,
}

impl RusshConnector {
    pub fn new(connect_timeout: Duration, strict_host_key_checking: bool) -> Self {
        Self {
            connect_timeout,
            strict_host_key_checking,
        }
    }

    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        params: &ConnectParams,
    ) -> ShellResult<bool> {
        match &params.credential {
            Credential::Password { password } => handle
                .authenticate_password(params.username.clone(), password.expose_secret())
                .await
                .map_err(|e| ShellError::Transport(format!("password auth: {e}"))),
            Credential::PrivateKey { path, passphrase } => {
                let key_pair = russh_keys::load_secret_key(
                    path,
                    passphrase.as_ref().map(|p| p.expose_secret()),
                )
                .map_err(|e| {
                    ShellError::AuthFailed(format!("cannot load key {}: {e}", path.display()))
                })?;
                handle
                    .authenticate_publickey(params.username.clone(), Arc::new(key_pair))
                    .await
                    .map_err(|e| ShellError::Transport(format!("publickey auth: {e}")))
            }
        }
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, params: &ConnectParams) -> ShellResult<Arc<dyn ShellTransport>> {
        validate_params(params)?;
        let label = format!("{}@{}:{}", params.username, params.host, params.port);
        info!(target_host = %label, "opening ssh connection");

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });
        let handler = ClientHandler {
            strict_host_key_checking: self.strict_host_key_checking,
        };

        let connecting = client::connect(config, (params.host.as_str(), params.port), handler);
        let mut handle = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Err(_) => return Err(ShellError::Timeout),
            Ok(Err(e)) => return Err(ShellError::Transport(format!("{label}: {e}"))),
            Ok(Ok(handle)) => handle,
        };

        if !Self::authenticate(&mut handle, params).await? {
            warn!(target_host = %label, "ssh authentication rejected");
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(ShellError::AuthFailed(label));
        }

        info!(target_host = %label, "ssh connection established");
        Ok(Arc::new(RusshTransport {
            label,
            handle,
            disconnected: AtomicBool::new(false),
        }))
    }
}

/// Connection-level callbacks.
struct ClientHandler {
    strict_host_key_checking: bool,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.strict_host_key_checking {
            // No known_hosts store is wired in, so every key is unknown.
            warn!(
                fingerprint = %server_public_key.fingerprint(),
                "rejecting unknown host key"
            );
            return Ok(false);
        }
        debug!(fingerprint = %server_public_key.fingerprint(), "accepting host key");
        Ok(true)
    }
}

/// An authenticated russh session.
pub struct RusshTransport {
    label: String,
    handle: Handle<ClientHandler>,
    disconnected: AtomicBool,
}

#[async_trait]
impl ShellTransport for RusshTransport {
    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst) && !self.handle.is_closed()
    }

    async fn open_pty(&self, spec: &PtySpec) -> ShellResult<PtyChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ShellError::ChannelOpen(format!("{}: {e}", self.label)))?;

        channel
            .request_pty(
                false,
                &spec.term,
                spec.cols,
                spec.rows,
                spec.pixel_width,
                spec.pixel_height,
                &[],
            )
            .await
            .map_err(|e| ShellError::ChannelOpen(format!("pty request: {e}")))?;

        for (name, value) in &spec.env {
            // Servers commonly refuse env requests (AcceptEnv); not fatal.
            if let Err(e) = channel.set_env(false, name.as_str(), value.as_str()).await {
                debug!(target_host = %self.label, var = %name, error = %e, "set_env refused");
            }
        }

        channel
            .request_shell(false)
            .await
            .map_err(|e| ShellError::ChannelOpen(format!("shell request: {e}")))?;

        let input = Box::pin(channel.make_writer());
        Ok(PtyChannel::new(RusshOutput { channel }, input))
    }

    async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            debug!(target_host = %self.label, error = %e, "ssh disconnect failed");
        }
        info!(target_host = %self.label, "ssh connection closed");
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

struct RusshOutput {
    channel: Channel<Msg>,
}

#[async_trait]
impl PtyOutput for RusshOutput {
    async fn next_chunk(&mut self) -> ShellResult<Option<Vec<u8>>> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) if !data.is_empty() => {
                    return Ok(Some(data.to_vec()));
                }
                Some(ChannelMsg::ExtendedData { data, .. }) if !data.is_empty() => {
                    return Ok(Some(data.to_vec()));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(None),
                Some(_) => {}
            }
        }
    }
}
