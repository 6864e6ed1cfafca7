//! Application event bus.
//!
//! The dispatcher only ever calls [`EventBus::emit`]. [`BroadcastBus`] is the
//! in-process implementation: each channel is a tokio broadcast channel
//! created on first subscription.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::session::SessionUpdateEvent;

/// Default per-channel buffer for [`BroadcastBus`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Publish side of a pub/sub mediator.
pub trait EventBus: Send + Sync {
    /// Publish `event` on `channel`.
    fn emit(&self, channel: &str, event: SessionUpdateEvent);
}

/// Broadcast-channel backed event bus.
#[derive(Debug)]
pub struct BroadcastBus {
    channels: RwLock<HashMap<String, broadcast::Sender<SessionUpdateEvent>>>,
    capacity: usize,
}

impl BroadcastBus {
    /// Create a bus with the default per-channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose channels buffer `capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to `channel`.
    pub fn on(&self, channel: &str) -> Subscription {
        let mut channels = self.channels.write();
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            channel: channel.to_string(),
            rx: sender.subscribe(),
        }
    }

    /// Unsubscribe. Dropping the subscription has the same effect.
    pub fn off(&self, subscription: Subscription) {
        let channel = subscription.channel.clone();
        drop(subscription);

        let mut channels = self.channels.write();
        if channels
            .get(&channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&channel);
        }
    }

    /// Number of live subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for BroadcastBus {
    fn emit(&self, channel: &str, event: SessionUpdateEvent) {
        let channels = self.channels.read();
        match channels.get(channel) {
            Some(sender) => {
                let delivered = sender.send(event).unwrap_or(0);
                trace!(channel, delivered, "event emitted");
            }
            None => trace!(channel, "no subscribers"),
        }
    }
}

/// A live subscription to one bus channel.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<SessionUpdateEvent>,
}

impl Subscription {
    /// The channel this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next event. Returns `None` once the bus is gone.
    ///
    /// Events lost to a slow consumer are skipped with a warning.
    pub async fn recv(&mut self) -> Option<SessionUpdateEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionUpdateEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
