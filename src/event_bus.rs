//! Outbound Event Bus
//!
//! Fire-and-forget fan-out of lifecycle notifications to subscribers such as
//! DNS sync or alarms. Nothing is acknowledged: a subscriber that is not
//! listening, or that lags past the buffer, simply misses events.

use tokio::sync::broadcast;

/// Broadcast channel wrapper
///
/// Clones publish into the same channel.
///
/// # Type Parameters
/// * `E` - Event type (must be Clone for broadcasting)
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// `capacity` bounds how many events each subscriber may fall behind
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, returning how many subscribers it reached
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Notice {
        Up(String),
        Gone(String),
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(10);
        let mut dns = bus.subscribe();
        let mut alarm = bus.subscribe();

        assert_eq!(bus.publish(Notice::Up("a".to_string())), 2);
        assert_eq!(dns.recv().await.unwrap(), Notice::Up("a".to_string()));
        assert_eq!(alarm.recv().await.unwrap(), Notice::Up("a".to_string()));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus: EventBus<Notice> = EventBus::new(10);
        assert_eq!(bus.publish(Notice::Gone("a".to_string())), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_past_events() {
        let bus = EventBus::new(10);
        bus.publish(Notice::Up("a".to_string()));

        let mut rx = bus.subscribe();
        bus.publish(Notice::Gone("a".to_string()));
        assert_eq!(rx.recv().await.unwrap(), Notice::Gone("a".to_string()));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
