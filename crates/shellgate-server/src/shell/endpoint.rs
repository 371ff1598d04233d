//! Routes `/app/shell/{id}/{action}` SEND frames to the shell service.

use super::ShellService;
use crate::bus::AppDestinationHandler;
use async_trait::async_trait;
use shellgate_core::{Destination, ShellError, ShellResult, ShellRoute};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ShellEndpoint {
    service: Arc<ShellService>,
}

impl ShellEndpoint {
    pub fn new(service: Arc<ShellService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AppDestinationHandler for ShellEndpoint {
    async fn on_send(
        &self,
        connection_id: &str,
        destination: &Destination,
        body: Vec<u8>,
    ) -> ShellResult<()> {
        let route = ShellRoute::parse(destination).ok_or_else(|| {
            ShellError::InvalidRequest(format!("no handler for {destination}"))
        })?;

        match route {
            ShellRoute::Connect { session_id } => {
                let params = self.service.claim(connection_id, &session_id).await?;
                // SSH connect can take up to the connect timeout; keep the
                // socket loop free meanwhile.
                let service = self.service.clone();
                let connection_id = connection_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = service
                        .open_claimed(&connection_id, &session_id, params)
                        .await
                    {
                        warn!(session_id = %session_id, connection_id = %connection_id, error = %e, "shell open failed");
                    }
                });
                Ok(())
            }
            ShellRoute::Command { session_id } => {
                self.service.send_command(&session_id, &body).await
            }
            ShellRoute::Disconnect { session_id } => {
                debug!(session_id = %session_id, connection_id, "client requested disconnect");
                self.service.disconnect(&session_id).await
            }
        }
    }
}
