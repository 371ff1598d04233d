//! Transport connection ↔ business session registry.
//!
//! A connection id maps to exactly one business session, and a business
//! session maps to at most one live connection. Both directions live behind
//! one lock so they can never disagree.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Kind of business session a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusinessType {
    Shell,
    FileTransfer,
}

impl BusinessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessType::Shell => "SHELL",
            BusinessType::FileTransfer => "FILE_TRANSFER",
        }
    }
}

impl fmt::Display for BusinessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSessionMetadata {
    pub connection_id: String,
    pub business_session_id: String,
    pub business_type: BusinessType,
    pub registered_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl TransportSessionMetadata {
    pub fn new(
        connection_id: impl Into<String>,
        business_session_id: impl Into<String>,
        business_type: BusinessType,
    ) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            business_session_id: business_session_id.into(),
            business_type,
            registered_at: now,
            last_activity_at: now,
        }
    }
}

#[derive(Default)]
struct Maps {
    by_connection: HashMap<String, TransportSessionMetadata>,
    /// Business session id → connection id.
    by_business: HashMap<String, String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    maps: RwLock<Maps>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a business session.
    ///
    /// A business session re-registered under a new connection drops the
    /// old connection's entry, so the stale socket's later disconnect no
    /// longer reaches the session. Returns that displaced entry, if any.
    pub async fn register(
        &self,
        metadata: TransportSessionMetadata,
    ) -> Option<TransportSessionMetadata> {
        let mut guard = self.maps.write().await;
        let maps = &mut *guard;

        // The connection may have been bound to some other session before.
        let rebound = maps
            .by_connection
            .get(&metadata.connection_id)
            .filter(|p| p.business_session_id != metadata.business_session_id)
            .map(|p| p.business_session_id.clone());
        if let Some(old_business) = rebound {
            maps.by_business.remove(&old_business);
        }

        let stale_connection = maps
            .by_business
            .get(&metadata.business_session_id)
            .filter(|c| **c != metadata.connection_id)
            .cloned();
        let displaced = stale_connection.and_then(|c| maps.by_connection.remove(&c));

        maps.by_business.insert(
            metadata.business_session_id.clone(),
            metadata.connection_id.clone(),
        );
        info!(
            connection_id = %metadata.connection_id,
            session_id = %metadata.business_session_id,
            business_type = %metadata.business_type,
            replaced = displaced.is_some(),
            "transport session registered"
        );
        maps.by_connection
            .insert(metadata.connection_id.clone(), metadata);
        displaced
    }

    /// Remove a connection. The business mapping is dropped only if it
    /// still points at this connection.
    pub async fn unregister(&self, connection_id: &str) -> Option<TransportSessionMetadata> {
        let mut guard = self.maps.write().await;
        let maps = &mut *guard;
        let metadata = maps.by_connection.remove(connection_id)?;
        if maps
            .by_business
            .get(&metadata.business_session_id)
            .is_some_and(|c| c == connection_id)
        {
            maps.by_business.remove(&metadata.business_session_id);
        }
        debug!(connection_id, session_id = %metadata.business_session_id, "transport session unregistered");
        Some(metadata)
    }

    pub async fn lookup(&self, connection_id: &str) -> Option<TransportSessionMetadata> {
        self.maps.read().await.by_connection.get(connection_id).cloned()
    }

    pub async fn connection_for(&self, business_session_id: &str) -> Option<String> {
        self.maps
            .read()
            .await
            .by_business
            .get(business_session_id)
            .cloned()
    }

    /// Refresh `last_activity_at`; returns the updated entry.
    pub async fn touch(&self, connection_id: &str) -> Option<TransportSessionMetadata> {
        let mut maps = self.maps.write().await;
        let entry = maps.by_connection.get_mut(connection_id)?;
        entry.last_activity_at = Utc::now();
        Some(entry.clone())
    }

    pub async fn count(&self) -> usize {
        self.maps.read().await.by_connection.len()
    }

    pub async fn count_by_type(&self, business_type: BusinessType) -> usize {
        self.maps
            .read()
            .await
            .by_connection
            .values()
            .filter(|m| m.business_type == business_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = SessionRegistry::new();
        registry
            .register(TransportSessionMetadata::new("c1", "s1", BusinessType::Shell))
            .await;
        registry
            .register(TransportSessionMetadata::new("c2", "f1", BusinessType::FileTransfer))
            .await;

        assert_eq!(registry.lookup("c1").await.unwrap().business_session_id, "s1");
        assert_eq!(registry.connection_for("s1").await.as_deref(), Some("c1"));
        assert_eq!(registry.connection_for("f1").await.as_deref(), Some("c2"));
        assert_eq!(registry.count().await, 2);
        assert_eq!(registry.count_by_type(BusinessType::Shell).await, 1);

        let removed = registry.unregister("c1").await.unwrap();
        assert_eq!(removed.business_session_id, "s1");
        assert!(registry.lookup("c1").await.is_none());
        assert!(registry.connection_for("s1").await.is_none());
        assert!(registry.unregister("c1").await.is_none());
    }

    #[tokio::test]
    async fn reconnection_displaces_stale_connection() {
        let registry = SessionRegistry::new();
        registry
            .register(TransportSessionMetadata::new("old", "s1", BusinessType::Shell))
            .await;
        let displaced = registry
            .register(TransportSessionMetadata::new("new", "s1", BusinessType::Shell))
            .await;
        assert_eq!(displaced.unwrap().connection_id, "old");

        // The stale socket going away no longer maps to the session.
        assert!(registry.unregister("old").await.is_none());
        assert_eq!(registry.connection_for("s1").await.as_deref(), Some("new"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn connection_rebound_to_other_session() {
        let registry = SessionRegistry::new();
        registry
            .register(TransportSessionMetadata::new("c1", "s1", BusinessType::Shell))
            .await;
        registry
            .register(TransportSessionMetadata::new("c1", "s2", BusinessType::Shell))
            .await;
        assert!(registry.connection_for("s1").await.is_none());
        assert_eq!(registry.connection_for("s2").await.as_deref(), Some("c1"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn touch_advances_activity() {
        let registry = SessionRegistry::new();
        let meta = TransportSessionMetadata::new("c1", "s1", BusinessType::Shell);
        let registered_at = meta.last_activity_at;
        registry.register(meta).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let touched = registry.touch("c1").await.unwrap();
        assert!(touched.last_activity_at > registered_at);
        assert!(registry.touch("missing").await.is_none());
    }
}
