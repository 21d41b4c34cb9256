//! In-process topic-filtered pub/sub (spec §4.6).
//!
//! Shaped after `horus_core::communication::hub::Hub`'s subscriber
//! bookkeeping, but backed by `tokio::sync::mpsc` instead of shared memory:
//! this bus only ever has in-process publishers and subscribers, so there is
//! no need for the teacher's cross-process shared-memory transport.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::CameraEvent;

/// Bounded channel capacity for each (topic, subscriber) pair (spec §4.6).
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 20;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<CameraEvent>,
}

/// Topic-keyed event bus. Publish is non-blocking and drops the event for
/// any subscriber whose channel is full, rather than applying backpressure
/// to the publisher (spec §4.6).
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Subscribe to one or more topics, returning a single receiver that
    /// merges events published to any of them, FIFO per (topic, subscriber).
    pub fn subscribe(&self, topics: &[String]) -> mpsc::Receiver<CameraEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut guard = self.topics.write();
        for topic in topics {
            guard
                .entry(topic.clone())
                .or_default()
                .push(Subscriber { id, tx: tx.clone() });
        }
        rx
    }

    /// Publish non-blocking: a full subscriber channel drops this event for
    /// that subscriber only, other subscribers are unaffected.
    pub fn try_publish(&self, topic: &str, event: CameraEvent) {
        let guard = self.topics.read();
        let Some(subscribers) = guard.get(topic) else {
            return;
        };
        for sub in subscribers {
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(event.clone()) {
                debug!(topic, subscriber = sub.id, "event bus channel full, dropping event");
            }
        }
    }

    /// Remove a subscriber from the given topics by dropping its sender
    /// side, which closes its receiver once already-queued events drain.
    pub fn close(&self, topics: &[String], subscriber_id: u64) {
        let mut guard = self.topics.write();
        for topic in topics {
            if let Some(subs) = guard.get_mut(topic) {
                subs.retain(|s| s.id != subscriber_id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(topic: &str) -> CameraEvent {
        CameraEvent {
            core_type: "camera_event".to_string(),
            event_type: "motion".to_string(),
            topic: topic.to_string(),
            source: "cam1".to_string(),
            timestamp_ms: 0,
            raw_data: Vec::new(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_for_subscribed_topic_only() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&["motion".to_string()]);

        bus.try_publish("motion", sample_event("motion"));
        bus.try_publish("other", sample_event("other"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "motion");

        // No second event queued for the unsubscribed topic.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_drops_event_without_panicking() {
        let bus = EventBus::new();
        let _rx = bus.subscribe(&["motion".to_string()]);

        for _ in 0..(SUBSCRIBER_CHANNEL_CAPACITY + 5) {
            bus.try_publish("motion", sample_event("motion"));
        }
        // Reaching here without panicking demonstrates the drop-on-full policy.
    }
}
