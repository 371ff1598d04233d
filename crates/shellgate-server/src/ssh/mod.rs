pub mod client;
pub mod executor;
pub mod transport;

pub use client::{RusshConnector, SshConnector};
pub use executor::{ExecutionContext, ShellExecutor, ShellExit, ShellOutputHandler};
pub use transport::{PtyChannel, PtyOutput, ShellTransport};
