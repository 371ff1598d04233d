//! Correlates bus connections with business sessions.

pub mod events;
pub mod registry;

pub use events::{TransportEventRelay, TransportSessionListener};
pub use registry::{BusinessType, SessionRegistry, TransportSessionMetadata};
