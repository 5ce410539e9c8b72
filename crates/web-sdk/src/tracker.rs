//! Public tracking API. Turns page-level calls into outbound events, records
//! clicks in the attribution store, and enriches commerce events from it.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use tracker_cache::{build_storage, DurableStorage};
use tracker_core::clock::Clock;
use tracker_core::config::TrackerConfig;
use tracker_core::error::TrackerResult;
use tracker_core::event_bus::EventSink;
use tracker_core::types::{
    ClickDescriptor, EnrichedProduct, EventType, PageContext, Product, TrackingEvent,
};

use crate::attribution::AttributionStore;
use crate::collector::EventCollector;
use crate::enrichment::EventEnricher;
use crate::events::{CommerceRequest, ImpressionRequest, ProductViewRequest, SearchRequest};
use crate::session::{SessionHolder, SessionSource};
use crate::source::{click_from_attributes, TrackingDataSource};

pub struct Tracker {
    session: Arc<SessionHolder>,
    store: Arc<AttributionStore>,
    enricher: EventEnricher,
    collector: EventCollector,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    /// Wire a tracker over an existing storage backend. A session persisted
    /// by an earlier page load is picked up automatically.
    pub fn new(
        config: &TrackerConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let session = Arc::new(
            SessionHolder::new(
                storage.clone(),
                clock.clone(),
                &config.session,
                &config.attribution.key_prefix,
            )
            .with_customer_ttl(config.attribution.window()),
        );
        session.restore();

        let store = Arc::new(AttributionStore::new(
            &config.attribution,
            storage,
            session.clone(),
            clock.clone(),
        ));
        let enricher = EventEnricher::new(store.clone(), session.clone());
        let collector = EventCollector::new(config.collector.batch_size).with_event_sink(sink);

        Self {
            session,
            store,
            enricher,
            collector,
            clock,
        }
    }

    /// Build the configured storage backend and wire a tracker over it.
    pub fn from_config(
        config: &TrackerConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let storage = build_storage(&config.storage, clock.clone());
        Self::new(config, storage, clock, sink)
    }

    pub fn session(&self) -> &SessionHolder {
        &self.session
    }

    pub fn store(&self) -> &AttributionStore {
        &self.store
    }

    pub fn collector(&self) -> &EventCollector {
        &self.collector
    }

    pub fn track_page_view(&mut self, context: PageContext) {
        let event = self.base_event(EventType::PageView, Some(context));
        self.collector.ingest(event);
    }

    pub fn track_product_view(&mut self, request: ProductViewRequest) {
        let mut event = self.base_event(EventType::ProductView, request.context);
        event.products.push(Product::new(request.ref_id).into());
        self.collector.ingest(event);
    }

    pub fn track_impressions(&mut self, request: ImpressionRequest) {
        if request.ref_ids.is_empty() {
            return;
        }
        let mut event = self.base_event(EventType::Impression, request.context);
        event.products = request
            .ref_ids
            .into_iter()
            .map(|ref_id| Product::new(ref_id).into())
            .collect();
        if let Some(widget_id) = request.widget_id {
            event.properties.insert("widgetId".into(), widget_id.into());
        }
        if let Some(ad_set_id) = request.ad_set_id {
            event.properties.insert("adSetId".into(), ad_set_id.into());
        }
        self.collector.ingest(event);
    }

    pub fn track_search(&mut self, request: SearchRequest) {
        let mut event = self.base_event(EventType::Search, request.context);
        event.properties.insert("query".into(), request.query.into());
        event.products = request
            .result_ref_ids
            .into_iter()
            .map(|ref_id| Product::new(ref_id).into())
            .collect();
        self.collector.ingest(event);
    }

    /// Emit a product click and, when it happened inside a widget or ad-set,
    /// record it as the product's latest attribution. Returns the click id.
    pub fn track_click(&mut self, click: ClickDescriptor, context: Option<PageContext>) -> String {
        let click_id = click
            .click_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut event = self.base_event(EventType::ProductClick, context);
        event.click_id = Some(click_id.clone());
        let mut product = EnrichedProduct::from(Product::new(click.product_ref_id.clone()));
        product.click_id = Some(click_id.clone());
        product.ids = click.ids.clone();
        product.sponsored = click.sponsored.clone();
        event.products.push(product);
        self.collector.ingest(event);

        if self.store.record_click(&click, &click_id).is_none() {
            debug!(
                product_ref_id = %click.product_ref_id,
                "click not recorded for attribution"
            );
        }
        click_id
    }

    /// Click whose descriptor is read from a data source. None when the
    /// source has nothing or no product id.
    pub fn track_click_from(
        &mut self,
        source: &dyn TrackingDataSource,
        context: Option<PageContext>,
    ) -> Option<String> {
        let attributes = source.extract()?;
        let click = click_from_attributes(&attributes)?;
        Some(self.track_click(click, context))
    }

    /// Fails with `MissingAttribution`, sending nothing, when no click id was
    /// given and some product has no live attribution. A cart with no
    /// products sends nothing.
    pub fn track_add_to_cart(&mut self, request: CommerceRequest) -> TrackerResult<()> {
        if request.products.is_empty() {
            debug!("empty add-to-cart skipped");
            return Ok(());
        }
        let click_id = request.click_id.filter(|id| !id.is_empty());
        let prepared = self
            .enricher
            .enrich_add_to_cart(request.products, click_id.as_deref())
            .inspect_err(|e| warn!(error = %e, "add-to-cart rejected"))?;

        let mut event = self.base_event(EventType::AddToCart, request.context);
        event.click_id = click_id;
        event.products = prepared.into_iter().map(|p| p.product).collect();
        self.collector.ingest(event);
        Ok(())
    }

    pub fn track_checkout(&mut self, request: CommerceRequest) {
        let prepared = self.enricher.enrich_checkout(request.products);

        let mut event = self.base_event(EventType::Checkout, request.context);
        event.products = prepared.into_iter().map(|p| p.product).collect();
        insert_order_fields(&mut event, request.order_id, request.currency);
        self.collector.ingest(event);
    }

    /// Emits the purchase, then consumes every attribution record it used.
    pub fn track_purchase(&mut self, request: CommerceRequest) {
        let purchase = self.enricher.enrich_purchase(request.products);

        let mut event = self.base_event(EventType::Purchase, request.context);
        event.products = purchase.products.clone();
        insert_order_fields(&mut event, request.order_id, request.currency);
        self.collector.ingest(event);

        purchase.commit(&self.store);
    }

    /// Send everything buffered. Returns the number of events sent.
    pub fn flush(&mut self) -> usize {
        self.collector.flush()
    }

    fn base_event(&self, event_type: EventType, context: Option<PageContext>) -> TrackingEvent {
        self.session.touch();
        let mut event = TrackingEvent::new(event_type, self.clock.now());
        event.session_id = self.session.session_id();
        event.customer_id = self.session.customer_id();
        event.context = context;
        event
    }
}

fn insert_order_fields(event: &mut TrackingEvent, order_id: Option<String>, currency: Option<String>) {
    if let Some(order_id) = order_id {
        event.properties.insert("orderId".into(), order_id.into());
    }
    if let Some(currency) = currency {
        event.properties.insert("currency".into(), currency.into());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tracker_core::clock::ManualClock;
    use tracker_core::event_bus::capture_sink;
    use crate::source::StaticDataSource;

    fn tracker() -> (Tracker, Arc<tracker_core::event_bus::CaptureSink>) {
        let sink = capture_sink();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = Tracker::from_config(&TrackerConfig::default(), clock, sink.clone());
        tracker.session().start("S1", "CUST1");
        (tracker, sink)
    }

    #[test]
    fn test_click_generates_id_and_event() {
        let (mut tracker, sink) = tracker();
        let mut click = ClickDescriptor::new("SKU1");
        click.ids.widget_id = Some("W1".into());

        let click_id = tracker.track_click(click, None);
        assert!(!click_id.is_empty());
        tracker.flush();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ProductClick);
        assert_eq!(events[0].click_id.as_deref(), Some(click_id.as_str()));
        assert_eq!(events[0].customer_id.as_deref(), Some("CUST1"));
        assert_eq!(
            tracker.store().resolve("CUST1", "SKU1").unwrap().click_id,
            click_id
        );
    }

    #[test]
    fn test_click_from_data_source() {
        let (mut tracker, _) = tracker();
        let source = StaticDataSource::from([
            ("data-product-id", "SKU1"),
            ("data-widget-id", "W1"),
            ("data-click-id", "C7"),
        ]);
        assert_eq!(tracker.track_click_from(&source, None).as_deref(), Some("C7"));
        assert!(tracker
            .track_click_from(&StaticDataSource::empty(), None)
            .is_none());
    }

    #[test]
    fn test_rejected_add_to_cart_sends_nothing() {
        let (mut tracker, sink) = tracker();
        let result = tracker.track_add_to_cart(CommerceRequest::new(vec![Product::new("SKU1")]));
        assert!(result.is_err());
        assert_eq!(tracker.flush(), 0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_blank_click_id_counts_as_absent() {
        let (mut tracker, sink) = tracker();
        let mut click = ClickDescriptor::new("SKU1");
        click.ids.widget_id = Some("W1".into());
        tracker.track_click(click, None);
        tracker.flush();
        sink.clear();

        tracker
            .track_add_to_cart(CommerceRequest::new(vec![Product::new("SKU1")]).with_click_id(""))
            .unwrap();
        tracker.flush();
        let event = &sink.events()[0];
        assert!(event.click_id.is_none());
        assert!(event.products[0].click_id.is_some());

        let err = tracker
            .track_add_to_cart(CommerceRequest::new(vec![Product::new("SKU2")]).with_click_id(""))
            .unwrap_err();
        assert!(matches!(err, tracker_core::error::TrackerError::MissingAttribution { .. }));
    }

    #[test]
    fn test_empty_add_to_cart_sends_nothing() {
        let (mut tracker, sink) = tracker();
        tracker.track_add_to_cart(CommerceRequest::new(Vec::new())).unwrap();
        tracker
            .track_add_to_cart(CommerceRequest::new(Vec::new()).with_click_id("C1"))
            .unwrap();
        assert_eq!(tracker.flush(), 0);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_events_without_session() {
        let (mut tracker, sink) = tracker();
        tracker.session().invalidate();
        tracker.track_search(SearchRequest {
            query: "shoes".into(),
            result_ref_ids: vec!["SKU1".into()],
            context: None,
        });
        tracker.flush();
        let events = sink.events();
        assert_eq!(events[0].customer_id, None);
        assert_eq!(events[0].properties["query"], "shoes");
    }

    #[test]
    fn test_purchase_carries_order_fields() {
        let (mut tracker, sink) = tracker();
        tracker.track_purchase(
            CommerceRequest::new(vec![Product::new("SKU1").with_price(10.0, 2)]).with_order_id("O1"),
        );
        tracker.flush();
        let event = &sink.events()[0];
        assert_eq!(event.properties["orderId"], "O1");
        assert_eq!(event.products[0].product.quantity, 2);
        assert!(event.products[0].click_id.is_none());
    }
}
