//! Shell sessions: audit model, stores and the lifecycle manager.

pub mod manager;
pub mod model;
pub mod sqlite;
pub mod store;

pub use manager::{ShellSessionManager, SESSION_EXPIRED};
pub use model::{ConnectParams, ConnectRequest, Credential, ShellSession};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, SessionStore};
