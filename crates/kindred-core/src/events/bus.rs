//! Event bus using a tokio broadcast channel.
//!
//! Slow subscribers miss events rather than blocking the scheduler.

use tokio::sync::broadcast;

use crate::events::EngineEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out channel for [`EngineEvent`]s.
///
/// Fire-and-forget: with no subscribers, events are dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish an event. Never blocks and never fails.
    pub fn emit(&self, event: EngineEvent) {
        tracing::trace!(event = event.event_type(), "Publishing engine event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed out by [`EventBus::subscribe`].
pub struct EventSubscriber {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventSubscriber {
    /// Wait for the next event, skipping over any lag.
    ///
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event subscriber lagged");
                }
            }
        }
    }

    /// Next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}
