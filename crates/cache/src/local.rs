//! In-process attribution cache backed by DashMap.
//! Mirrors durable storage so repeated lookups skip deserialization; it is
//! never authoritative and starts empty on every process start.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracker_core::types::AttributionRecord;

/// L1 cache of attribution records keyed by their storage key.
pub struct LocalCache {
    store: DashMap<String, AttributionRecord>,
    max_entries: usize,
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: DashMap::new(),
            max_entries,
        }
    }

    /// Cached record for `key`, live or not. Liveness is the caller's call.
    pub fn get(&self, key: &str) -> Option<AttributionRecord> {
        self.store.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or overwrite a record.
    pub fn put(&self, key: String, record: AttributionRecord) {
        // Over capacity: skip the insert, durable storage still has it
        if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
            return;
        }
        self.store.insert(key, record);
    }

    pub fn remove(&self, key: &str) -> Option<AttributionRecord> {
        self.store.remove(key).map(|(_, record)| record)
    }

    /// Drop every record whose window has closed at `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.store.len();
        self.store.retain(|_, record| record.is_live(now));
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tracker_core::types::ClickDescriptor;

    fn record(now: DateTime<Utc>, window_ms: i64) -> AttributionRecord {
        let mut click = ClickDescriptor::new("SKU1");
        click.ids.widget_id = Some("W1".into());
        AttributionRecord::from_click(&click, "C1", now, Duration::milliseconds(window_ms))
    }

    #[test]
    fn test_put_get_remove() {
        let cache = LocalCache::new(10);
        let now = Utc::now();
        cache.put("k1".into(), record(now, 1000));

        assert_eq!(cache.get("k1").unwrap().click_id, "C1");
        assert_eq!(cache.len(), 1);
        assert!(cache.remove("k1").is_some());
        assert!(cache.remove("k1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_skips_new_keys_only() {
        let cache = LocalCache::new(1);
        let now = Utc::now();
        cache.put("k1".into(), record(now, 1000));
        cache.put("k2".into(), record(now, 1000));
        assert!(cache.get("k2").is_none());

        let mut updated = record(now, 1000);
        updated.click_id = "C2".into();
        cache.put("k1".into(), updated);
        assert_eq!(cache.get("k1").unwrap().click_id, "C2");
    }

    #[test]
    fn test_evict_expired() {
        let cache = LocalCache::new(10);
        let now = Utc::now();
        cache.put("short".into(), record(now, 1000));
        cache.put("long".into(), record(now, 60_000));

        let evicted = cache.evict_expired(now + Duration::seconds(2));
        assert_eq!(evicted, 1);
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
    }
}
