//! Audit store for shell sessions.
//!
//! Updates are targeted (one column family per call) rather than
//! read-modify-write, so a concurrent write, close and sweep can never
//! regress a row: status changes only follow legal lifecycle steps and
//! `last_activity_at` only moves forward.

use super::model::ShellSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shellgate_core::{ShellResult, ShellStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &ShellSession) -> ShellResult<()>;

    async fn find(&self, session_id: &str) -> ShellResult<Option<ShellSession>>;

    /// Sessions created by `owner`, newest first.
    async fn list_by_owner(&self, owner: &str) -> ShellResult<Vec<ShellSession>>;

    /// Advance `last_activity_at` to `at` (never backwards).
    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> ShellResult<()>;

    async fn increment_commands(&self, session_id: &str) -> ShellResult<()>;

    /// Apply `to` if it is a legal step from the row's current status.
    /// Entering a terminal status stamps `disconnected_at`. Returns whether
    /// the row changed.
    async fn transition(
        &self,
        session_id: &str,
        to: ShellStatus,
        at: DateTime<Utc>,
    ) -> ShellResult<bool>;

    async fn set_error(&self, session_id: &str, message: &str) -> ShellResult<()>;
}

/// Process-local store, used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, ShellSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: &ShellSession) -> ShellResult<()> {
        self.rows
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, session_id: &str) -> ShellResult<Option<ShellSession>> {
        Ok(self.rows.read().await.get(session_id).cloned())
    }

    async fn list_by_owner(&self, owner: &str) -> ShellResult<Vec<ShellSession>> {
        let rows = self.rows.read().await;
        let mut sessions: Vec<ShellSession> = rows
            .values()
            .filter(|s| s.owner_identity == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> ShellResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(session_id) {
            if at > row.last_activity_at {
                row.last_activity_at = at;
            }
        }
        Ok(())
    }

    async fn increment_commands(&self, session_id: &str) -> ShellResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(session_id) {
            row.command_count += 1;
        }
        Ok(())
    }

    async fn transition(
        &self,
        session_id: &str,
        to: ShellStatus,
        at: DateTime<Utc>,
    ) -> ShellResult<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(session_id) else {
            return Ok(false);
        };
        if !row.status.can_transition_to(to) {
            return Ok(false);
        }
        row.status = to;
        if to.is_terminal() {
            row.disconnected_at = Some(at);
        }
        Ok(true)
    }

    async fn set_error(&self, session_id: &str, message: &str) -> ShellResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(session_id) {
            row.error_message = Some(message.to_string());
        }
        Ok(())
    }
}
