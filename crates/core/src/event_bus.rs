//! Outbound event sink — the boundary to the transport collaborator.
//!
//! The collector hands over one batch per event type; implementations
//! serialize and send it however they like (beacon, fetch, stdout).

use crate::types::{EventType, TrackingEvent};
use std::sync::{Arc, Mutex};

/// Trait for sending a batch of outbound events of a single type.
pub trait EventSink: Send + Sync {
    fn send_batch(&self, event_type: EventType, events: Vec<TrackingEvent>);
}

/// No-op sink for tests and callers that don't need transmission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn send_batch(&self, _event_type: EventType, _events: Vec<TrackingEvent>) {}
}

/// In-memory sink that captures batches for testing.
#[derive(Default)]
pub struct CaptureSink {
    batches: Mutex<Vec<(EventType, Vec<TrackingEvent>)>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<(EventType, Vec<TrackingEvent>)> {
        self.batches.lock().expect("event sink mutex poisoned").clone()
    }

    /// All captured events, flattened in send order.
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.batches
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .flat_map(|(_, events)| events.iter().cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.batches
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .map(|(_, events)| events.len())
            .sum()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.batches
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .filter(|(t, _)| *t == event_type)
            .map(|(_, events)| events.len())
            .sum()
    }

    pub fn clear(&self) {
        self.batches.lock().expect("event sink mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn send_batch(&self, event_type: EventType, events: Vec<TrackingEvent>) {
        self.batches
            .lock()
            .expect("event sink mutex poisoned")
            .push((event_type, events));
    }
}

/// Convenience: create a no-op sink.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.send_batch(
            EventType::AddToCart,
            vec![
                TrackingEvent::new(EventType::AddToCart, Utc::now()),
                TrackingEvent::new(EventType::AddToCart, Utc::now()),
            ],
        );
        sink.send_batch(
            EventType::Purchase,
            vec![TrackingEvent::new(EventType::Purchase, Utc::now())],
        );

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.count_type(EventType::AddToCart), 2);
        assert_eq!(sink.count_type(EventType::Purchase), 1);
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.events()[2].event_type, EventType::Purchase);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.send_batch(EventType::Search, Vec::new());
    }
}
