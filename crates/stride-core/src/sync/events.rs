//! Queue and sync state change notifications

use tokio::sync::broadcast;

/// Broadcast notification about queue contents or a drain cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Queue contents changed; carries the fresh pending count
    QueueChanged { pending: u64 },
    /// A drain cycle began
    SyncStarted,
    /// A drain cycle ended, by exhaustion or by halting on a failure
    SyncCompleted { synced: usize, pending: u64 },
}

/// Process-wide broadcast of [`SyncEvent`]s.
///
/// No persistence and no delivery guarantee: only currently subscribed
/// receivers see an event, and slow receivers may observe lag. Emitting
/// with zero subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity (must be non-zero)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register an observer; the receiver lives as long as the observer does
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Broadcast to all current subscribers
    pub fn emit(&self, event: SyncEvent) {
        // Send only fails with no active receivers, which is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.emit(SyncEvent::SyncStarted);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(SyncEvent::QueueChanged { pending: 3 });

        assert_eq!(
            first.recv().await.unwrap(),
            SyncEvent::QueueChanged { pending: 3 }
        );
        assert_eq!(
            second.recv().await.unwrap(),
            SyncEvent::QueueChanged { pending: 3 }
        );
    }

    #[tokio::test]
    async fn test_events_arrive_in_emit_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::SyncStarted);
        bus.emit(SyncEvent::SyncCompleted {
            synced: 2,
            pending: 0,
        });

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::SyncStarted);
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::SyncCompleted {
                synced: 2,
                pending: 0
            }
        );
    }
}
