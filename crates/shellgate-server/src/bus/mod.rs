//! In-process STOMP bus: broker plus the WebSocket front end.

pub mod broker;
pub mod websocket;

pub use broker::{BusEvent, MessageBroker};
pub use websocket::AppDestinationHandler;
