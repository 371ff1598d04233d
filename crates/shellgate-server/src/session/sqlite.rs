//! SQLite-backed audit store.

use super::model::ShellSession;
use super::store::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use shellgate_core::{ShellError, ShellResult, ShellStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

pub struct SqliteStore {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> ShellError {
    ShellError::Store(e.to_string())
}

/// Fixed-width RFC 3339 so textual comparison matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> ShellResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ShellError::Store(format!("bad timestamp {s:?}: {e}")))
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> ShellResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        // Each connection to an in-memory database is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init().await?;
        info!(url, "sqlite audit store ready");
        Ok(store)
    }

    pub async fn init(&self) -> ShellResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactive_shell_session (
                session_id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                owner_identity TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                disconnected_at TEXT,
                command_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_shell_session_owner
                ON interactive_shell_session(owner_identity, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> ShellResult<ShellSession> {
        let status: String = row.get("status");
        let port: i64 = row.get("port");
        let command_count: i64 = row.get("command_count");
        let created_at: String = row.get("created_at");
        let last_activity_at: String = row.get("last_activity_at");
        let expires_at: String = row.get("expires_at");
        let disconnected_at: Option<String> = row.get("disconnected_at");

        Ok(ShellSession {
            session_id: row.get("session_id"),
            host: row.get("host"),
            port: u16::try_from(port)
                .map_err(|_| ShellError::Store(format!("bad port {port}")))?,
            username: row.get("username"),
            owner_identity: row.get("owner_identity"),
            status: ShellStatus::parse(&status)
                .ok_or_else(|| ShellError::Store(format!("bad status {status:?}")))?,
            created_at: parse_ts(&created_at)?,
            last_activity_at: parse_ts(&last_activity_at)?,
            expires_at: parse_ts(&expires_at)?,
            disconnected_at: disconnected_at.as_deref().map(parse_ts).transpose()?,
            command_count: command_count.max(0) as u64,
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, s: &ShellSession) -> ShellResult<()> {
        sqlx::query(
            r#"
            INSERT INTO interactive_shell_session
            (session_id, host, port, username, owner_identity, status, created_at,
             last_activity_at, expires_at, disconnected_at, command_count, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.session_id)
        .bind(&s.host)
        .bind(i64::from(s.port))
        .bind(&s.username)
        .bind(&s.owner_identity)
        .bind(s.status.as_str())
        .bind(ts(s.created_at))
        .bind(ts(s.last_activity_at))
        .bind(ts(s.expires_at))
        .bind(s.disconnected_at.map(ts))
        .bind(s.command_count as i64)
        .bind(&s.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find(&self, session_id: &str) -> ShellResult<Option<ShellSession>> {
        let row = sqlx::query("SELECT * FROM interactive_shell_session WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_by_owner(&self, owner: &str) -> ShellResult<Vec<ShellSession>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM interactive_shell_session
            WHERE owner_identity = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> ShellResult<()> {
        let at = ts(at);
        sqlx::query(
            r#"
            UPDATE interactive_shell_session
            SET last_activity_at = ?
            WHERE session_id = ? AND last_activity_at < ?
            "#,
        )
        .bind(&at)
        .bind(session_id)
        .bind(&at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn increment_commands(&self, session_id: &str) -> ShellResult<()> {
        sqlx::query(
            "UPDATE interactive_shell_session SET command_count = command_count + 1 WHERE session_id = ?",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn transition(
        &self,
        session_id: &str,
        to: ShellStatus,
        at: DateTime<Utc>,
    ) -> ShellResult<bool> {
        let from: Vec<&'static str> = [
            ShellStatus::Connecting,
            ShellStatus::Connected,
            ShellStatus::Disconnected,
            ShellStatus::Error,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(to))
        .map(|s| s.as_str())
        .collect();
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE interactive_shell_session
            SET status = ?, disconnected_at = COALESCE(?, disconnected_at)
            WHERE session_id = ? AND status IN ({placeholders})
            "#
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(to.is_terminal().then(|| ts(at)))
            .bind(session_id);
        for status in from {
            query = query.bind(status);
        }
        let result = query.execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_error(&self, session_id: &str, message: &str) -> ShellResult<()> {
        sqlx::query("UPDATE interactive_shell_session SET error_message = ? WHERE session_id = ?")
            .bind(message)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::tests::{exercise_store, row};

    #[tokio::test]
    async fn sqlite_store_contract() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn round_trips_a_row() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let original = row("shell_x", "alice", Utc::now());
        store.insert(&original).await.unwrap();
        let loaded = store.find("shell_x").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, original.session_id);
        assert_eq!(loaded.status, ShellStatus::Connecting);
        assert_eq!(
            loaded.expires_at.timestamp_micros(),
            original.expires_at.timestamp_micros()
        );
        assert!(store.insert(&original).await.is_err());
    }
}
