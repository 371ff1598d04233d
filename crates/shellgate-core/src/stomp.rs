//! STOMP 1.2 framing for the message bus.
//!
//! Wire format: `COMMAND\n(name:value\n)*\n<body>\0`. Any number of EOLs may
//! appear between frames (heart-beats) and are skipped by the decoder.

use crate::error::{ShellError, ShellResult};

/// Largest frame the decoder will buffer (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// STOMP frame commands (client and server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Stomp => "STOMP",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Ack => "ACK",
            StompCommand::Nack => "NACK",
            StompCommand::Begin => "BEGIN",
            StompCommand::Commit => "COMMIT",
            StompCommand::Abort => "ABORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let cmd = match s {
            "CONNECT" => StompCommand::Connect,
            "STOMP" => StompCommand::Stomp,
            "CONNECTED" => StompCommand::Connected,
            "SEND" => StompCommand::Send,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            "DISCONNECT" => StompCommand::Disconnect,
            "ACK" => StompCommand::Ack,
            "NACK" => StompCommand::Nack,
            "BEGIN" => StompCommand::Begin,
            "COMMIT" => StompCommand::Commit,
            "ABORT" => StompCommand::Abort,
            _ => return None,
        };
        Some(cmd)
    }

    /// CONNECT and CONNECTED frames carry headers verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Builder-style header append.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header. Repeated headers resolve to the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize into wire bytes, adding `content-length` for non-empty bodies.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(s: &str) -> ShellResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(ShellError::Codec(format!(
                    "undefined header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Streaming frame decoder: accumulates bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all complete frames.
    pub fn feed(&mut self, data: &[u8]) -> ShellResult<Vec<StompFrame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            self.skip_heartbeats();
            if self.buffer.is_empty() {
                break;
            }

            let Some((head_end, body_start)) = find_head_end(&self.buffer) else {
                self.check_size()?;
                break;
            };

            let head = std::str::from_utf8(&self.buffer[..head_end])
                .map_err(|e| ShellError::Codec(format!("frame head is not UTF-8: {e}")))?;
            let (command, headers) = parse_head(head)?;

            let content_length = headers
                .iter()
                .find(|(k, _)| k == "content-length")
                .map(|(_, v)| {
                    v.trim().parse::<usize>().map_err(|_| {
                        ShellError::Codec(format!("invalid content-length: {v}"))
                    })
                })
                .transpose()?;

            let body_end = match content_length {
                Some(len) => {
                    if len > MAX_FRAME_SIZE {
                        return Err(ShellError::Codec(format!(
                            "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
                        )));
                    }
                    if self.buffer.len() < body_start + len + 1 {
                        break;
                    }
                    if self.buffer[body_start + len] != 0 {
                        return Err(ShellError::Codec(
                            "frame body not NUL-terminated after content-length".into(),
                        ));
                    }
                    body_start + len
                }
                None => match self.buffer[body_start..].iter().position(|b| *b == 0) {
                    Some(pos) => body_start + pos,
                    None => {
                        self.check_size()?;
                        break;
                    }
                },
            };

            let body = self.buffer[body_start..body_end].to_vec();
            self.buffer.drain(..=body_end);
            frames.push(StompFrame {
                command,
                headers,
                body,
            });
        }

        Ok(frames)
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn skip_heartbeats(&mut self) {
        let skip = self
            .buffer
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();
        if skip > 0 {
            self.buffer.drain(..skip);
        }
    }

    fn check_size(&self) -> ShellResult<()> {
        if self.buffer.len() > MAX_FRAME_SIZE {
            return Err(ShellError::Codec(format!(
                "frame too large: {} bytes buffered (max {MAX_FRAME_SIZE})",
                self.buffer.len()
            )));
        }
        Ok(())
    }
}

/// Locate the blank line ending the frame head.
///
/// Returns `(head_len, body_start)`.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, b) in buf.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        let mut line = &buf[line_start..i];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() && line_start > 0 {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

fn parse_head(head: &str) -> ShellResult<(StompCommand, Vec<(String, String)>)> {
    let mut lines = head.lines();
    let command_line = lines
        .next()
        .ok_or_else(|| ShellError::Codec("empty frame".into()))?;
    let command = StompCommand::parse(command_line.trim_end_matches('\r'))
        .ok_or_else(|| ShellError::Codec(format!("unknown command: {command_line}")))?;

    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ShellError::Codec(format!("malformed header: {line}")))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    Ok((command, headers))
}
