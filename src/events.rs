//! Resolver events and the event-bus seam.
//!
//! Every externally visible state change is announced on an [`EventBus`].
//! Emission is fire-and-forget: a slow or absent subscriber never stalls
//! resolution. [`ChannelEventBus`] delivers over a bounded crossbeam channel
//! with non-blocking `try_send` and counts what it had to drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};

/// Event payloads, tagged by `type`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    /// A resolution finished (cache misses only).
    EntityResolved {
        identifier: String,
        candidate_count: usize,
        top_confidence: f32,
    },

    /// An entity was created with its identity graph.
    EntityCreated {
        names: Vec<String>,
        platforms: Vec<String>,
    },

    /// A merge completed.
    EntityMerged {
        merged_ids: Vec<EntityId>,
        before: Vec<Entity>,
        after: Box<Entity>,
        unresolved_fields: Vec<String>,
    },

    /// A new merge proposal was recorded.
    MergeProposalCreated {
        proposal_key: String,
        candidate_ids: Vec<EntityId>,
        confidence: f32,
    },

    /// A proposal crossed the review threshold.
    MergeReadyForReview {
        proposal_key: String,
        confidence: f32,
        requires_confirmation: bool,
    },
}

/// An event with its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverEvent {
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Entity the event is about (the primary for merges). `None` when a
    /// resolution found nothing.
    pub entity_id: Option<EntityId>,
    /// Event-specific data.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ResolverEvent {
    /// Wraps a payload with the current timestamp.
    #[must_use]
    pub fn now(entity_id: Option<EntityId>, payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            entity_id,
            payload,
        }
    }

    /// The kebab-case event type name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::EntityResolved { .. } => "entity-resolved",
            EventPayload::EntityCreated { .. } => "entity-created",
            EventPayload::EntityMerged { .. } => "entity-merged",
            EventPayload::MergeProposalCreated { .. } => "merge-proposal-created",
            EventPayload::MergeReadyForReview { .. } => "merge-ready-for-review",
        }
    }
}

/// Destination for resolver events.
pub trait EventBus: Send + Sync {
    /// Publishes an event. Must not block.
    fn emit(&self, event: ResolverEvent);
}

/// Bus that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event: ResolverEvent) {}
}

/// Bounded in-process bus.
#[derive(Debug)]
pub struct ChannelEventBus {
    tx: Sender<ResolverEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelEventBus {
    /// Creates a bus and the stream that receives from it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: Arc::clone(&dropped),
            },
            EventStream { rx, dropped },
        )
    }

    /// Events dropped because the stream was full or gone.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventBus for ChannelEventBus {
    fn emit(&self, event: ResolverEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev) | TrySendError::Disconnected(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = ev.kind(), "event stream unavailable, event dropped");
            }
        }
    }
}

/// Receiving end of a [`ChannelEventBus`].
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<ResolverEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Next event if one is queued.
    #[must_use]
    pub fn try_next(&self) -> Option<ResolverEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ResolverEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Removes and returns every queued event.
    #[must_use]
    pub fn drain(&self) -> Vec<ResolverEvent> {
        self.rx.try_iter().collect()
    }

    /// Events the bus had to drop.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(n: usize) -> ResolverEvent {
        ResolverEvent::now(
            None,
            EventPayload::EntityResolved {
                identifier: "x".to_string(),
                candidate_count: n,
                top_confidence: 0.0,
            },
        )
    }

    #[test]
    fn channel_bus_delivers_in_order() {
        let (bus, stream) = ChannelEventBus::new(8);
        bus.emit(resolved(1));
        bus.emit(resolved(2));
        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].payload,
            EventPayload::EntityResolved { candidate_count: 2, .. }
        ));
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (bus, stream) = ChannelEventBus::new(1);
        bus.emit(resolved(1));
        bus.emit(resolved(2));
        assert_eq!(bus.dropped_events(), 1);
        assert_eq!(stream.dropped_events(), 1);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ResolverEvent::now(
            Some(EntityId::new()),
            EventPayload::MergeReadyForReview {
                proposal_key: "a:b".to_string(),
                confidence: 0.8,
                requires_confirmation: true,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "merge-ready-for-review");
        assert_eq!(json["proposal_key"], "a:b");
        assert!(json.get("timestamp").is_some());
        assert_eq!(event.kind(), "merge-ready-for-review");
    }
}
