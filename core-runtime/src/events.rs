//! # Event Bus System
//!
//! Event-driven notifications for the collection engine, built on
//! `tokio::sync::broadcast`. Scans, registry changes and statistics updates
//! are announced here so that browsing surfaces can react without being
//! coupled to the engine internals.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ScanEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Scan(ScanEvent::Started {
//!     job_id: "a1b2".to_string(),
//! }));
//! ```
//!
//! Subscribers that fall behind receive `RecvError::Lagged` and continue from
//! the oldest retained event; emitting never blocks.

use tokio::sync::broadcast;

/// Events emitted by the scan pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A scan job started running.
    Started { job_id: String },
    /// Periodic progress while a scan is running.
    Progress { job_id: String, files_processed: u64 },
    /// A scan job finished. `changed` is false for aborted or failed scans
    /// and for incremental scans that found nothing new.
    Done { job_id: String, changed: bool },
}

/// Events emitted by the collection registry and the SQL collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    /// A collection became visible to browsing surfaces.
    Added { collection_id: String },
    /// A collection was removed at runtime.
    Removed { collection_id: String },
    /// A collection's status bits changed.
    StatusChanged { collection_id: String },
    /// A schema version mismatch forced a destructive rebuild of the named
    /// table family. Surfaced exactly once per startup, user-visible.
    SchemaRebuilt { family: String },
    /// A track's score changed.
    ScoreChanged { url: String, percentage: i64 },
    /// A track's rating changed.
    RatingChanged { url: String, rating: i64 },
}

/// Engine-wide event type carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    Scan(ScanEvent),
    Collection(CollectionEvent),
}

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning the bus is cheap; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus retaining up to `capacity` undelivered events
    /// per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers the event reached. An event with no
    /// subscribers is dropped silently; that is not an error.
    pub fn emit(&self, event: CoreEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_to_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let event = CoreEvent::Scan(ScanEvent::Started {
            job_id: "job-1".to_string(),
        });
        assert_eq!(bus.emit(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_dropped() {
        let bus = EventBus::new(16);
        let reached = bus.emit(CoreEvent::Collection(CollectionEvent::Removed {
            collection_id: "local".to_string(),
        }));
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(CoreEvent::Collection(CollectionEvent::SchemaRebuilt {
            family: "tags".to_string(),
        }));

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
