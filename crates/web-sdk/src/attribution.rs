//! Attribution store — per-product, per-channel ledger of the last click.
//!
//! Records live at `{prefix}attribution_{customer}_{product}_{s|o}` in the
//! durable backend, mirrored by an instance-owned [`LocalCache`]. Writes and
//! deletes always go to both tiers; reads try the cache, then storage, and
//! delete whatever they find stale or unparseable.
//!
//! Every operation is best-effort: storage failures are logged and turn into
//! no-ops or misses, they never reach the caller.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use tracker_cache::{DurableStorage, LocalCache};
use tracker_core::clock::Clock;
use tracker_core::config::AttributionConfig;
use tracker_core::error::TrackerError;
use tracker_core::types::{AttributionRecord, Channel, ClickDescriptor};

use crate::session::SessionSource;

/// Identity of one attribution slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributionKey {
    pub customer_id: String,
    pub product_ref_id: String,
    pub channel: Channel,
}

impl AttributionKey {
    pub fn new(
        customer_id: impl Into<String>,
        product_ref_id: impl Into<String>,
        channel: Channel,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            product_ref_id: product_ref_id.into(),
            channel,
        }
    }

    pub fn storage_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}attribution_{}_{}_{}",
            self.customer_id,
            self.product_ref_id,
            self.channel.suffix()
        )
    }
}

pub struct AttributionStore {
    storage: Arc<dyn DurableStorage>,
    cache: LocalCache,
    session: Arc<dyn SessionSource>,
    clock: Arc<dyn Clock>,
    window: Duration,
    key_prefix: String,
}

impl AttributionStore {
    pub fn new(
        config: &AttributionConfig,
        storage: Arc<dyn DurableStorage>,
        session: Arc<dyn SessionSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            cache: LocalCache::new(config.cache_max_entries),
            session,
            clock,
            window: config.window(),
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Store `record` for the product, overwriting the previous click on the
    /// same channel.
    pub fn record(&self, customer_id: &str, product_ref_id: &str, record: AttributionRecord) {
        if customer_id.is_empty() || product_ref_id.is_empty() {
            debug!(product_ref_id, "no session or product, attribution not recorded");
            return;
        }
        let key = AttributionKey::new(customer_id, product_ref_id, record.channel())
            .storage_key(&self.key_prefix);

        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(e) = self.storage.set(&key, &json, Some(record.expires_at)) {
                    metrics::counter!("attribution.storage_failure").increment(1);
                    warn!(key = %key, error = %e, "failed to persist attribution record");
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize attribution record");
            }
        }

        debug!(
            key = %key,
            click_id = %record.click_id,
            channel = %record.channel(),
            "attribution recorded"
        );
        metrics::counter!("attribution.recorded").increment(1);
        self.cache.put(key, record);
    }

    /// Record a click for the current customer. Clicks outside any widget or
    /// ad-set are ignored. Returns the stored record.
    pub fn record_click(
        &self,
        click: &ClickDescriptor,
        click_id: &str,
    ) -> Option<AttributionRecord> {
        if !click.has_commercial_context() {
            debug!(product_ref_id = %click.product_ref_id, "click has no widget or ad-set context");
            return None;
        }
        let customer_id = self.session.customer_id()?;
        let record = AttributionRecord::from_click(click, click_id, self.clock.now(), self.window);
        self.record(&customer_id, &click.product_ref_id, record.clone());
        Some(record)
    }

    /// Live attribution for a product: sponsored first, organic only when no
    /// live sponsored record exists.
    pub fn resolve(&self, customer_id: &str, product_ref_id: &str) -> Option<AttributionRecord> {
        if customer_id.is_empty() || product_ref_id.is_empty() {
            return None;
        }
        Channel::PRIORITY.iter().find_map(|&channel| {
            self.lookup(&AttributionKey::new(customer_id, product_ref_id, channel))
        })
    }

    /// Delete the current customer's record for one channel. Idempotent.
    pub fn consume(&self, product_ref_id: &str, channel: Channel) {
        let Some(customer_id) = self.session.customer_id() else {
            debug!(product_ref_id, "no session, nothing to consume");
            return;
        };
        let key = AttributionKey::new(customer_id, product_ref_id, channel)
            .storage_key(&self.key_prefix);
        self.remove(&key);
        metrics::counter!("attribution.consumed").increment(1);
        debug!(key = %key, "attribution consumed");
    }

    /// Raw durable read without liveness checks or side effects.
    pub fn peek(&self, key: &AttributionKey) -> Option<String> {
        self.storage
            .get(&key.storage_key(&self.key_prefix))
            .ok()
            .flatten()
    }

    fn lookup(&self, key: &AttributionKey) -> Option<AttributionRecord> {
        let storage_key = key.storage_key(&self.key_prefix);
        let now = self.clock.now();

        let record = match self.cache.get(&storage_key) {
            Some(record) => {
                metrics::counter!("attribution.cache.hit").increment(1);
                record
            }
            None => {
                metrics::counter!("attribution.cache.miss").increment(1);
                self.load(&storage_key)?
            }
        };

        if !record.is_live(now) {
            debug!(key = %storage_key, expires_at = %record.expires_at, "attribution expired");
            metrics::counter!("attribution.expired").increment(1);
            self.remove(&storage_key);
            return None;
        }

        self.cache.put(storage_key, record.clone());
        Some(record)
    }

    fn load(&self, storage_key: &str) -> Option<AttributionRecord> {
        let raw = match self.storage.get(storage_key) {
            Ok(raw) => raw?,
            Err(e) => {
                metrics::counter!("attribution.storage_failure").increment(1);
                warn!(key = %storage_key, error = %e, "failed to read attribution record");
                return None;
            }
        };
        match serde_json::from_str::<AttributionRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                let err = TrackerError::CorruptRecord {
                    key: storage_key.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "discarding corrupt attribution record");
                self.remove(storage_key);
                None
            }
        }
    }

    fn remove(&self, storage_key: &str) {
        self.cache.remove(storage_key);
        if let Err(e) = self.storage.delete(storage_key) {
            metrics::counter!("attribution.storage_failure").increment(1);
            warn!(key = %storage_key, error = %e, "failed to delete attribution record");
        }
    }
}
