//! Interactive shell executor.
//!
//! Opens a PTY channel on a transport, runs exactly one reader task per
//! open shell and exposes raw writes. Output is handed to a
//! [`ShellOutputHandler`] as UTF-8 text in read order.

use super::transport::{PtyOutput, ShellTransport};
use crate::config::PtySpec;
use async_trait::async_trait;
use shellgate_core::{ShellError, ShellResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the reader task ended, when it ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellExit {
    /// Remote closed the stream (e.g. the user typed `exit`).
    Closed,
    /// Reading failed.
    Failed(String),
}

/// Receives output and end-of-stream notifications from a reader task.
#[async_trait]
pub trait ShellOutputHandler: Send + Sync {
    async fn on_output(&self, chunk: String);

    /// Called once when the stream ends without `close()` having been
    /// called. Must not await `ShellExecutor::close` on the same context
    /// inline, since that joins the calling task.
    async fn on_exit(&self, exit: ShellExit);
}

/// Live state of one open shell.
pub struct ExecutionContext {
    label: String,
    input: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    cancel: CancellationToken,
    reader: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ExecutionContext {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Opens and drives PTY shells.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    pty: PtySpec,
    prompt_wait: Duration,
    close_timeout: Duration,
}

impl ShellExecutor {
    pub fn new(pty: PtySpec, prompt_wait: Duration, close_timeout: Duration) -> Self {
        Self {
            pty,
            prompt_wait,
            close_timeout,
        }
    }

    /// Open a PTY shell on `transport` and start its reader task.
    ///
    /// Waits `prompt_wait` before returning so the first prompt is not
    /// raced against channel setup.
    pub async fn open(
        &self,
        transport: &Arc<dyn ShellTransport>,
        handler: Arc<dyn ShellOutputHandler>,
    ) -> ShellResult<Arc<ExecutionContext>> {
        if !transport.is_connected() {
            return Err(ShellError::NotConnected(format!(
                "transport {} is not connected",
                transport.describe()
            )));
        }

        let channel = transport.open_pty(&self.pty).await?;
        let label = transport.describe();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            label.clone(),
            channel.output,
            handler,
            cancel.clone(),
        ));

        let ctx = Arc::new(ExecutionContext {
            label,
            input: Mutex::new(Some(channel.input)),
            cancel,
            reader: StdMutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        });

        info!(
            target_host = %ctx.label,
            term = %self.pty.term,
            cols = self.pty.cols,
            rows = self.pty.rows,
            "shell opened"
        );

        if !self.prompt_wait.is_zero() {
            tokio::time::sleep(self.prompt_wait).await;
        }
        Ok(ctx)
    }

    /// Write raw bytes to the shell and flush. No line buffering.
    pub async fn write(&self, ctx: &ExecutionContext, input: &[u8]) -> ShellResult<()> {
        if ctx.is_closed() {
            return Err(ShellError::NotConnected(format!(
                "shell on {} is closed",
                ctx.label
            )));
        }
        let mut guard = ctx.input.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            ShellError::NotConnected(format!("shell on {} is closed", ctx.label))
        })?;
        writer
            .write_all(input)
            .await
            .map_err(|e| ShellError::ShellIo(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| ShellError::ShellIo(format!("flush failed: {e}")))?;
        Ok(())
    }

    /// Stop the reader task and close the channel. Idempotent.
    pub async fn close(&self, ctx: &ExecutionContext) {
        if ctx.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        ctx.cancel.cancel();

        if let Some(mut input) = ctx.input.lock().await.take() {
            if let Err(e) = input.shutdown().await {
                debug!(target_host = %ctx.label, error = %e, "shell input shutdown failed");
            }
        }

        let reader = ctx.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(handle) = reader {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.close_timeout, handle).await.is_err() {
                warn!(
                    target_host = %ctx.label,
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "reader task did not stop in time, aborting"
                );
                abort.abort();
            }
        }
        info!(target_host = %ctx.label, "shell closed");
    }
}

async fn read_loop(
    label: String,
    mut output: Box<dyn PtyOutput>,
    handler: Arc<dyn ShellOutputHandler>,
    cancel: CancellationToken,
) {
    let mut decoder = Utf8Chunker::default();
    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = output.next_chunk() => match chunk {
                Ok(Some(bytes)) => {
                    let text = decoder.push(&bytes);
                    if !text.is_empty() {
                        handler.on_output(text).await;
                    }
                }
                Ok(None) => break ShellExit::Closed,
                Err(e) => {
                    warn!(target_host = %label, error = %e, "shell read failed");
                    break ShellExit::Failed(e.to_string());
                }
            },
        }
    };

    let tail = decoder.finish();
    if !tail.is_empty() {
        handler.on_output(tail).await;
    }
    if cancel.is_cancelled() {
        return;
    }
    debug!(target_host = %label, exit = ?exit, "reader task finished");
    handler.on_exit(exit).await;
}

/// Incremental UTF-8 decoder. A multi-byte character split across two
/// reads is held back until it completes; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = self.pending.len();
                }
                Err(e) => {
                    let good = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..good]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = good + bad;
                        }
                        None => {
                            start = good;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
