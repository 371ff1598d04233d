//! Publishes shell envelopes onto `/topic/shell/{id}`.

use crate::bus::MessageBroker;
use shellgate_core::{shell_topic, OutputMessage, ShellStatus, MESSAGE_KIND_HEADER};
use std::sync::Arc;
use tracing::{error, trace};

#[derive(Clone)]
pub struct ShellPublisher {
    broker: Arc<MessageBroker>,
}

impl ShellPublisher {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        Self { broker }
    }

    pub async fn output(&self, session_id: &str, data: String) {
        self.publish(session_id, OutputMessage::output(data)).await;
    }

    pub async fn status(&self, session_id: &str, status: ShellStatus, message: impl Into<String>) {
        self.publish(session_id, OutputMessage::status(status, message))
            .await;
    }

    pub async fn error(&self, session_id: &str, message: impl Into<String>) {
        self.publish(session_id, OutputMessage::error(message)).await;
    }

    async fn publish(&self, session_id: &str, message: OutputMessage) {
        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(e) => {
                error!(session_id, error = %e, "failed to encode shell message");
                return;
            }
        };
        let delivered = self
            .broker
            .publish(
                &shell_topic(session_id),
                &[
                    (MESSAGE_KIND_HEADER, message.kind.as_str()),
                    ("content-type", "application/json;charset=utf-8"),
                ],
                body,
            )
            .await;
        trace!(session_id, kind = message.kind.as_str(), delivered, "shell message published");
    }
}
