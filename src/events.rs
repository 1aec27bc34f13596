//! Notification bus for lifecycle and progress events
//!
//! A thin wrapper around a `tokio::sync::broadcast` channel. Publishing is
//! fire-and-forget: listeners connected at publish time each get a copy, late
//! listeners miss earlier events, and publishing with nobody listening is fine.

use crate::types::{Event, EventChannel};
use tokio::sync::broadcast;

/// Shared publish/subscribe handle, cheap to clone
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per listener
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current listener
    pub fn publish(&self, event: Event) {
        tracing::debug!(
            event = event.label(),
            channel = ?event.channel(),
            listeners = self.tx.receiver_count(),
            "publishing event"
        );
        // send() only fails when there are no receivers
        self.tx.send(event).ok();
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receive the next event on `channel`, skipping events for other channels
///
/// Lagged receivers skip ahead to the oldest event still buffered. Returns
/// `None` once the bus is dropped.
pub async fn next_on_channel(
    rx: &mut broadcast::Receiver<Event>,
    channel: EventChannel,
) -> Option<Event> {
    loop {
        match rx.recv().await {
            Ok(event) if event.channel() == channel => return Some(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event listener lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
