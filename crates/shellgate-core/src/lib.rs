//! shellgate-core: Shared protocol library for the shell gateway.
//!
//! Provides the STOMP frame codec, message-bus destination naming, the
//! JSON envelope and DTOs exchanged with browser clients, and the common
//! error type.

pub mod destination;
pub mod error;
pub mod messages;
pub mod stomp;

// Re-export commonly used items at crate root.
pub use destination::{
    shell_command_destination, shell_connect_destination, shell_topic, Destination, ShellRoute,
    SHELL_WEBSOCKET_PATH,
};
pub use error::{ErrorKind, ShellError, ShellResult};
pub use messages::{
    ApiResponse, ConnectResponse, MessageKind, OutputMessage, ShellSessionInfo, ShellStatus,
    MESSAGE_KIND_HEADER,
};
pub use stomp::{FrameDecoder, StompCommand, StompFrame};
