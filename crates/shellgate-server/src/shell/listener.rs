//! Closes shell sessions when their bus connection goes away.

use crate::relay::{BusinessType, TransportSessionListener, TransportSessionMetadata};
use crate::session::ShellSessionManager;
use async_trait::async_trait;
use shellgate_core::ShellResult;
use std::sync::Arc;
use tracing::info;

pub struct ShellTransportListener {
    manager: Arc<ShellSessionManager>,
}

impl ShellTransportListener {
    pub fn new(manager: Arc<ShellSessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TransportSessionListener for ShellTransportListener {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn business_type(&self) -> Option<BusinessType> {
        Some(BusinessType::Shell)
    }

    async fn on_disconnected(&self, metadata: &TransportSessionMetadata) -> ShellResult<()> {
        info!(
            connection_id = %metadata.connection_id,
            session_id = %metadata.business_session_id,
            "transport gone, closing shell session"
        );
        self.manager.close(&metadata.business_session_id).await
    }
}
