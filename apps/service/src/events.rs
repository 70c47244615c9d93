//! Live probe-outcome fan-out.

use tokio::sync::broadcast;
use tracing::trace;

use crate::monitoring::types::ProbeEvent;

/// Events buffered per subscriber before slow subscribers start lagging.
const BUS_CAPACITY: usize = 256;

/// Sink for probe outcomes, fire and forget
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ProbeEvent);
}

/// In-process broadcast of probe outcomes to any number of observers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProbeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProbeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: ProbeEvent) {
        trace!(monitor_id = event.monitor_id, success = event.success, "Publishing probe event");
        // Ignore errors if there are no receivers
        let _ = self.tx.send(event);
    }
}
