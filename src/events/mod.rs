//! Event bus for controller state notifications
//!
//! State transitions, VBUS errors and mode switches are published here so
//! that the daemon (and anything embedding the library) can observe the port
//! without holding the controller lock.

pub mod types;

pub use types::OtgEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcasts controller events to every subscriber
///
/// # Example
///
/// ```no_run
/// use otg_glue::events::{EventBus, OtgEvent};
/// use otg_glue::usbcore::PortMode;
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(OtgEvent::ModeChanged { mode: PortMode::Host });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<OtgEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: OtgEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive all future events
    ///
    /// A subscriber that falls too far behind gets `Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<OtgEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
