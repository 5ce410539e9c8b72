//! Event collector — buffers outbound events per type and hands full batches
//! to the event sink. Also maintains per-session counters.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use tracker_core::event_bus::{noop_sink, EventSink};
use tracker_core::types::{EventType, TrackingEvent};

/// Per-session aggregate counters.
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    pub session_id: String,
    pub page_views: u64,
    pub product_views: u64,
    pub clicks: u64,
    pub impressions: u64,
    pub searches: u64,
    pub add_to_carts: u64,
    pub checkouts: u64,
    pub purchases: u64,
    pub total_events: u64,
}

/// Events without a session are counted under this id.
const ANONYMOUS_SESSION: &str = "anonymous";

pub struct EventCollector {
    buffers: HashMap<EventType, Vec<TrackingEvent>>,
    batch_size: usize,
    session_metrics: DashMap<String, SessionMetrics>,
    event_sink: Arc<dyn EventSink>,
}

impl EventCollector {
    pub fn new(batch_size: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            batch_size: batch_size.max(1),
            session_metrics: DashMap::new(),
            event_sink: noop_sink(),
        }
    }

    /// Attach the transport sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Accept an event for sending. Flushes its type once the batch is full.
    pub fn ingest(&mut self, event: TrackingEvent) {
        let session_id = event
            .session_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_SESSION.to_string());

        // Scoped to drop the DashMap ref before flush
        {
            let mut metrics = self
                .session_metrics
                .entry(session_id.clone())
                .or_insert_with(|| SessionMetrics {
                    session_id,
                    ..Default::default()
                });
            metrics.total_events += 1;
            match event.event_type {
                EventType::PageView => metrics.page_views += 1,
                EventType::ProductView => metrics.product_views += 1,
                EventType::ProductClick => metrics.clicks += 1,
                EventType::Impression => metrics.impressions += 1,
                EventType::Search => metrics.searches += 1,
                EventType::AddToCart => metrics.add_to_carts += 1,
                EventType::Checkout => metrics.checkouts += 1,
                EventType::Purchase => metrics.purchases += 1,
            }
        }

        debug!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            "tracking event accepted"
        );

        let event_type = event.event_type;
        let buffer = self.buffers.entry(event_type).or_default();
        buffer.push(event);
        if buffer.len() >= self.batch_size {
            self.flush_type(event_type);
        }
    }

    /// Send the buffered batch for one type. Returns the number of events sent.
    pub fn flush_type(&mut self, event_type: EventType) -> usize {
        let Some(batch) = self.buffers.remove(&event_type) else {
            return 0;
        };
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        info!(event_type = event_type.as_str(), count, "sending event batch");
        metrics::counter!("tracker.batches_sent").increment(1);
        self.event_sink.send_batch(event_type, batch);
        count
    }

    /// Send every buffered batch. Returns the number of events sent.
    pub fn flush(&mut self) -> usize {
        let mut types: Vec<EventType> = self.buffers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types.into_iter().map(|t| self.flush_type(t)).sum()
    }

    /// Number of events currently buffered, across all types.
    pub fn buffered_count(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    pub fn session_metrics(&self, session_id: &str) -> Option<SessionMetrics> {
        self.session_metrics.get(session_id).map(|m| m.clone())
    }

    pub fn all_session_metrics(&self) -> Vec<SessionMetrics> {
        self.session_metrics
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
