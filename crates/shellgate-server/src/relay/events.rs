//! Fans bus lifecycle events out to business-level listeners.
//!
//! Only connections that something registered in the [`SessionRegistry`]
//! produce callbacks. Listeners are fixed at construction and each call is
//! isolated: an error or panic in one listener is logged and the rest still
//! run.

use super::registry::{BusinessType, SessionRegistry, TransportSessionMetadata};
use crate::bus::BusEvent;
use async_trait::async_trait;
use futures_util::FutureExt;
use shellgate_core::ShellResult;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait TransportSessionListener: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` receives events for every business type.
    fn business_type(&self) -> Option<BusinessType>;

    async fn on_connected(&self, _metadata: &TransportSessionMetadata) -> ShellResult<()> {
        Ok(())
    }

    async fn on_subscribed(
        &self,
        _metadata: &TransportSessionMetadata,
        _destination: &str,
    ) -> ShellResult<()> {
        Ok(())
    }

    async fn on_unsubscribed(
        &self,
        _metadata: &TransportSessionMetadata,
        _destination: &str,
    ) -> ShellResult<()> {
        Ok(())
    }

    /// The metadata has already been removed from the registry.
    async fn on_disconnected(&self, metadata: &TransportSessionMetadata) -> ShellResult<()>;
}

pub struct TransportEventRelay {
    registry: Arc<SessionRegistry>,
    listeners: Vec<Arc<dyn TransportSessionListener>>,
}

impl TransportEventRelay {
    pub fn new(
        registry: Arc<SessionRegistry>,
        listeners: Vec<Arc<dyn TransportSessionListener>>,
    ) -> Self {
        for l in &listeners {
            debug!(listener = l.name(), business_type = ?l.business_type(), "listener registered");
        }
        Self {
            registry,
            listeners,
        }
    }

    /// Consume bus events until the broker goes away.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<BusEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("transport event relay stopped");
    }

    pub async fn handle(&self, event: BusEvent) {
        let metadata = match &event {
            BusEvent::Disconnected { connection_id } => {
                self.registry.unregister(connection_id).await
            }
            BusEvent::Subscribed { connection_id, .. } => self.registry.touch(connection_id).await,
            BusEvent::Connected { connection_id }
            | BusEvent::Unsubscribed { connection_id, .. } => {
                self.registry.lookup(connection_id).await
            }
        };
        let Some(metadata) = metadata else {
            return;
        };

        for listener in self.matching(metadata.business_type) {
            let name = listener.name();
            match &event {
                BusEvent::Connected { .. } => {
                    isolate(name, "connected", listener.on_connected(&metadata)).await
                }
                BusEvent::Subscribed { destination, .. } => {
                    isolate(
                        name,
                        "subscribed",
                        listener.on_subscribed(&metadata, destination),
                    )
                    .await
                }
                BusEvent::Unsubscribed { destination, .. } => {
                    isolate(
                        name,
                        "unsubscribed",
                        listener.on_unsubscribed(&metadata, destination),
                    )
                    .await
                }
                BusEvent::Disconnected { .. } => {
                    isolate(name, "disconnected", listener.on_disconnected(&metadata)).await
                }
            }
        }
    }

    fn matching(
        &self,
        business_type: BusinessType,
    ) -> impl Iterator<Item = &Arc<dyn TransportSessionListener>> {
        self.listeners
            .iter()
            .filter(move |l| l.business_type().map_or(true, |t| t == business_type))
    }
}

async fn isolate(listener: &str, event: &str, call: impl Future<Output = ShellResult<()>>) {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(listener, event, error = %e, "listener failed"),
        Err(_) => error!(listener, event, "listener panicked"),
    }
}
