//! Shell business layer on top of the bus: publishing, orchestration and
//! the STOMP/transport hooks.

pub mod endpoint;
pub mod listener;
pub mod publisher;
pub mod service;

pub use endpoint::ShellEndpoint;
pub use listener::ShellTransportListener;
pub use publisher::ShellPublisher;
pub use service::ShellService;
