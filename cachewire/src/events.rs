//! Typed cache events
//!
//! Events are published on a `tokio::sync::broadcast` channel. Subscribers
//! that fall behind lose the oldest events; publishing with no subscribers
//! is not an error.

use crate::health::HealthReport;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

/// Something that happened inside a cache client
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A read found a value
    Hit {
        /// User key
        key: String,
    },
    /// A read found nothing
    Miss {
        /// User key
        key: String,
    },
    /// A value was written
    Set {
        /// User key
        key: String,
        /// Expiry applied, if any
        ttl: Option<Duration>,
    },
    /// A key was removed
    Delete {
        /// User key
        key: String,
    },
    /// An invalidation finished
    Invalidated {
        /// Number of keys removed
        count: usize,
    },
    /// An operation failed, or a best-effort step was skipped
    Error {
        /// Operation name
        operation: &'static str,
        /// User key, empty for keyless operations
        key: String,
        /// Error description
        message: String,
    },
    /// A health check graded the cache unhealthy
    HealthDegraded(HealthReport),
}

/// Fan-out of [`CacheEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus keeping up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    pub fn emit(&self, event: CacheEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    /// Receive events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(CacheEvent::Miss {
            key: "k".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(CacheEvent::Hit {
            key: "a".to_string(),
        });
        bus.emit(CacheEvent::Invalidated { count: 3 });

        assert!(matches!(rx.recv().await.unwrap(), CacheEvent::Hit { key } if key == "a"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::Invalidated { count: 3 }
        ));
    }
}
