//! Event Bus
//!
//! Single-producer fan-out for a run's event stream. Each subscriber owns a
//! bounded queue; publishing never blocks the orchestrator. A subscriber
//! whose queue is full gets disconnected — the stream never drops events for
//! the consumers that keep up.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::negotiation::events::NegotiationEvent;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<NegotiationEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Attach a new consumer. Subscriptions made after the bus closed yield
    /// an immediately-ended stream.
    pub fn subscribe(&self) -> mpsc::Receiver<NegotiationEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber. Slow subscribers are
    /// dropped rather than back-pressuring the run.
    pub fn publish(&self, event: &NegotiationEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    run_id = event.run_id(),
                    "dropping slow event subscriber"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Close the stream: all receivers end after draining what they have.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
