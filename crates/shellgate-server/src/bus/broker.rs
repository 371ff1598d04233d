//! Single-process STOMP message broker.
//!
//! Holds one bounded outbound queue per connection and the subscription
//! table. Every lifecycle change is reported as a [`BusEvent`] so the relay
//! can correlate transport connections with business sessions.

use dashmap::DashMap;
use shellgate_core::{Destination, StompCommand, StompFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Low-level connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Connected { connection_id: String },
    Subscribed { connection_id: String, destination: String },
    Unsubscribed { connection_id: String, destination: String },
    Disconnected { connection_id: String },
}

impl BusEvent {
    pub fn connection_id(&self) -> &str {
        match self {
            BusEvent::Connected { connection_id }
            | BusEvent::Subscribed { connection_id, .. }
            | BusEvent::Unsubscribed { connection_id, .. }
            | BusEvent::Disconnected { connection_id } => connection_id,
        }
    }
}

#[derive(Debug, Clone)]
struct Subscriber {
    connection_id: String,
    subscription_id: String,
}

pub struct MessageBroker {
    connections: DashMap<String, mpsc::Sender<StompFrame>>,
    /// Full destination path → subscribers.
    subscriptions: DashMap<String, Vec<Subscriber>>,
    events: mpsc::UnboundedSender<BusEvent>,
    next_message_id: AtomicU64,
}

impl MessageBroker {
    /// Create a broker and the receiving end of its event stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                connections: DashMap::new(),
                subscriptions: DashMap::new(),
                events,
                next_message_id: AtomicU64::new(1),
            },
            rx,
        )
    }

    fn emit(&self, event: BusEvent) {
        if self.events.send(event).is_err() {
            debug!("bus event receiver dropped");
        }
    }

    pub fn connect(&self, connection_id: &str, sender: mpsc::Sender<StompFrame>) {
        self.connections.insert(connection_id.to_string(), sender);
        info!(connection_id, "bus connection opened");
        self.emit(BusEvent::Connected {
            connection_id: connection_id.to_string(),
        });
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn subscribe(&self, connection_id: &str, subscription_id: &str, destination: &Destination) {
        let path = destination.full_path();
        {
            let mut subs = self.subscriptions.entry(path.clone()).or_default();
            subs.retain(|s| {
                !(s.connection_id == connection_id && s.subscription_id == subscription_id)
            });
            subs.push(Subscriber {
                connection_id: connection_id.to_string(),
                subscription_id: subscription_id.to_string(),
            });
        }
        debug!(connection_id, subscription_id, destination = %path, "subscribed");
        self.emit(BusEvent::Subscribed {
            connection_id: connection_id.to_string(),
            destination: path,
        });
    }

    /// Remove one subscription. Returns the destination it was attached to.
    pub fn unsubscribe(&self, connection_id: &str, subscription_id: &str) -> Option<String> {
        let mut found = None;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.len();
            entry.retain(|s| {
                !(s.connection_id == connection_id && s.subscription_id == subscription_id)
            });
            if entry.len() != before {
                found = Some(entry.key().clone());
                break;
            }
        }
        self.subscriptions.retain(|_, subs| !subs.is_empty());

        if let Some(destination) = &found {
            debug!(connection_id, subscription_id, destination = %destination, "unsubscribed");
            self.emit(BusEvent::Unsubscribed {
                connection_id: connection_id.to_string(),
                destination: destination.clone(),
            });
        }
        found
    }

    /// Drop a connection and all its subscriptions. Emits `Disconnected`
    /// once, no matter how many times it is called.
    pub fn disconnect(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_none() {
            return;
        }
        for mut entry in self.subscriptions.iter_mut() {
            entry.retain(|s| s.connection_id != connection_id);
        }
        self.subscriptions.retain(|_, subs| !subs.is_empty());
        info!(connection_id, "bus connection closed");
        self.emit(BusEvent::Disconnected {
            connection_id: connection_id.to_string(),
        });
    }

    /// Deliver a MESSAGE to every subscriber of `destination`.
    ///
    /// Awaits queue space on each subscriber, so a slow consumer slows the
    /// publisher down instead of growing memory. Returns the number of
    /// subscribers the message was queued for.
    pub async fn publish(
        &self,
        destination: &Destination,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> usize {
        let path = destination.full_path();
        let subscribers = match self.subscriptions.get(&path) {
            Some(subs) => subs.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for sub in subscribers {
            let sender = self.connections.get(&sub.connection_id).map(|s| s.clone());
            let Some(tx) = sender else { continue };

            let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            let mut frame = StompFrame::new(StompCommand::Message)
                .header("destination", &path)
                .header("subscription", &sub.subscription_id)
                .header("message-id", message_id.to_string());
            for (name, value) in headers {
                frame = frame.header(*name, *value);
            }
            let frame = frame.with_body(body.clone());

            if tx.send(frame).await.is_ok() {
                delivered += 1;
            } else {
                warn!(connection_id = %sub.connection_id, destination = %path, "subscriber queue closed");
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
