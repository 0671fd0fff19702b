//! Engine event bus.
//!
//! Lifecycle and audit events (reindexes, reindex failures, resolutions,
//! skipped evaluations) are broadcast on a [`tokio::sync::broadcast`]
//! channel so the authoring side and auditors can observe the engine
//! without being on the resolution path.
//!
//! Events are wrapped in [`Arc`] so that broadcasting to several
//! subscribers does not clone the payload.  Publishing never blocks and
//! never fails: with no subscriber the event is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new candidate index was installed.
    Reindexed {
        flow_id: String,
        version: u64,
        /// Blocks that made it into the index.
        indexed_blocks: usize,
        dropped_triggers: usize,
        timestamp: DateTime<Utc>,
    },

    /// Building a candidate index failed; the previous one is still active.
    ReindexFailed {
        flow_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A resolution selected a block.
    Resolved {
        resolution_id: Uuid,
        conversation_id: String,
        block_id: String,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    /// A resolution found no matching block.
    NoMatch {
        resolution_id: Uuid,
        conversation_id: String,
        evaluated: usize,
        timestamp: DateTime<Utc>,
    },

    /// A candidate was treated as non-matching because its evaluation
    /// failed.
    EvaluationSkipped {
        resolution_id: Uuid,
        conversation_id: String,
        block_id: String,
        trigger_index: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Publish/subscribe bus for [`EngineEvent`]s.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    sender: broadcast::Sender<Arc<EngineEvent>>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    ///
    /// A subscriber that falls more than `capacity` events behind receives
    /// [`broadcast::error::RecvError::Lagged`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventBusInner { sender }),
        }
    }

    /// Publish an event; returns how many subscribers will see it.
    pub fn publish(&self, event: EngineEvent) -> usize {
        match self.inner.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "engine event published");
                n
            }
            Err(_) => {
                tracing::trace!("engine event published but no active receivers");
                0
            }
        }
    }

    /// Subscribe to future events; earlier events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
        self.inner.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus.publish(EngineEvent::ReindexFailed {
            flow_id: "support".into(),
            reason: "duplicate block".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(receivers, 1);

        let received = rx.recv().await.expect("should receive event");
        match received.as_ref() {
            EngineEvent::ReindexFailed { flow_id, reason, .. } => {
                assert_eq!(flow_id, "support");
                assert_eq!(reason, "duplicate block");
            }
            other => panic!("unexpected event variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribers_share_the_same_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EngineEvent::NoMatch {
            resolution_id: Uuid::now_v7(),
            conversation_id: "c1".into(),
            evaluated: 3,
            timestamp: Utc::now(),
        });

        let e1 = rx1.recv().await.expect("rx1");
        let e2 = rx2.recv().await.expect("rx2");
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        let receivers = bus.publish(EngineEvent::ReindexFailed {
            flow_id: "f".into(),
            reason: "nobody listening".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(receivers, 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EngineEvent::Resolved {
            resolution_id: Uuid::now_v7(),
            conversation_id: "c1".into(),
            block_id: "greet".into(),
            score: 1.0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "resolved");
        assert_eq!(json["block_id"], "greet");
    }
}
