use thiserror::Error;

/// Errors produced by the shellgate protocol and session layers.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("channel open failed: {0}")]
    ChannelOpen(String),

    #[error("shell i/o error: {0}")]
    ShellIo(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("shell not connected: {0}")]
    NotConnected(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used to pick a response without matching on text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// SSH connect/auth or channel-open failure, before the shell is usable.
    Transport,
    /// Read/write failure on an open PTY.
    Io,
    /// Caller misuse: unknown session, wrong state, bad input.
    Usage,
    Internal,
}

impl ShellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShellError::Transport(_)
            | ShellError::AuthFailed(_)
            | ShellError::ChannelOpen(_)
            | ShellError::Timeout => ErrorKind::Transport,
            ShellError::ShellIo(_) | ShellError::Io(_) => ErrorKind::Io,
            ShellError::SessionNotFound(_)
            | ShellError::NotConnected(_)
            | ShellError::InvalidState(_)
            | ShellError::InvalidRequest(_) => ErrorKind::Usage,
            ShellError::Codec(_)
            | ShellError::Store(_)
            | ShellError::Config(_)
            | ShellError::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for ShellError {
    fn from(e: serde_json::Error) -> Self {
        ShellError::Codec(e.to_string())
    }
}

pub type ShellResult<T> = Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(ShellError::AuthFailed("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(ShellError::ShellIo("broken pipe".into()).kind(), ErrorKind::Io);
        assert_eq!(ShellError::NotConnected("s".into()).kind(), ErrorKind::Usage);
        assert_eq!(ShellError::Store("db".into()).kind(), ErrorKind::Internal);
    }
}
