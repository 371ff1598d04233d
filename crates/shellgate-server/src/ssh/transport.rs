//! Transport handle abstraction.
//!
//! A [`ShellTransport`] is an already-authenticated connection to a remote
//! host that can open interactive PTY channels. The russh-backed
//! implementation lives in [`super::client`]; tests use the in-process echo
//! transport from [`testing`].

use crate::config::PtySpec;
use async_trait::async_trait;
use shellgate_core::ShellResult;
use tokio::io::AsyncWrite;

/// Byte source of an open PTY channel.
#[async_trait]
pub trait PtyOutput: Send {
    /// Wait for the next non-empty chunk. `Ok(None)` means the remote side
    /// closed the stream cleanly.
    async fn next_chunk(&mut self) -> ShellResult<Option<Vec<u8>>>;
}

/// One interactive terminal channel: a read stream plus a raw input sink.
pub struct PtyChannel {
    pub output: Box<dyn PtyOutput>,
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
}

impl PtyChannel {
    pub fn new(
        output: impl PtyOutput + 'static,
        input: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            output: Box::new(output),
            input: Box::new(input),
        }
    }
}

/// An authenticated connection able to host PTY channels.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Open a session channel, request a PTY with `spec` and start a shell.
    async fn open_pty(&self, spec: &PtySpec) -> ShellResult<PtyChannel>;

    /// Tear the connection down. Safe to call more than once.
    async fn disconnect(&self);

    /// `user@host:port`, for logs.
    fn describe(&self) -> String;
}
