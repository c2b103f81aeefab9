//! Event types for the Encore event system
//!
//! Provides shared event definitions and EventBus for all Encore services.

mod import_types;

pub use import_types::{ImportPhase, JobStatus, ProgressEvent};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Encore event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EncoreEvent {
    /// A progress log entry was appended for an import job
    ///
    /// Triggers:
    /// - SSE: Push to every subscriber of the job's progress stream
    ImportProgress {
        /// The persisted progress entry
        event: ProgressEvent,
    },

    /// An artist was created by the bootstrap phase
    ///
    /// Triggers:
    /// - SSE: Refresh artist listings
    ArtistCreated {
        artist_id: Uuid,
        slug: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A bulk refresh run finished
    BulkSyncCompleted {
        /// Artists visited by the run
        artists_processed: usize,
        /// Artists where at least one phase failed
        artists_failed: usize,
        /// Run duration in seconds
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EncoreEvent {
    /// Get event type as string for SSE event field
    pub fn event_type(&self) -> &str {
        match self {
            EncoreEvent::ImportProgress { .. } => "ImportProgress",
            EncoreEvent::ArtistCreated { .. } => "ArtistCreated",
            EncoreEvent::BulkSyncCompleted { .. } => "BulkSyncCompleted",
        }
    }
}

// ============================================================================
// EventBus Implementation
// ============================================================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Fan-out: every subscriber receives every event emitted after it subscribed
/// - Bounded memory: slow subscribers observe `RecvError::Lagged` instead of
///   blocking emitters
///
/// Anything that must survive a lagging subscriber (e.g. import progress) is
/// persisted separately; the bus only carries live notifications.
///
/// # Examples
///
/// ```
/// use encore_common::events::EventBus;
///
/// let event_bus = EventBus::new(256);
/// let rx = event_bus.subscribe();
/// assert_eq!(event_bus.subscriber_count(), 1);
/// # drop(rx);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EncoreEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging subscribers lose events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EncoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EncoreEvent,
    ) -> Result<usize, broadcast::error::SendError<EncoreEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EncoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn progress(sequence: i64) -> EncoreEvent {
        EncoreEvent::ImportProgress {
            event: ProgressEvent {
                job_id: Uuid::new_v4(),
                sequence,
                phase: ImportPhase::Bootstrap,
                status: JobStatus::Bootstrapping,
                percentage: 0.0,
                message: "Bootstrapping".to_string(),
                timestamp: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.emit(progress(1)).unwrap(), 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                EncoreEvent::ImportProgress { event } => assert_eq!(event.sequence, 1),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus.emit(progress(1)).is_err());
        // Lossy variant never fails
        bus.emit_lossy(progress(2));
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(progress(1).event_type(), "ImportProgress");
        let done = EncoreEvent::BulkSyncCompleted {
            artists_processed: 3,
            artists_failed: 0,
            duration_seconds: 12,
            timestamp: Utc::now(),
        };
        assert_eq!(done.event_type(), "BulkSyncCompleted");
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "BulkSyncCompleted");
    }
}
