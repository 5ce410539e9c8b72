//! Session holder — keeps the session id and the customer id that scopes
//! every attribution key.
//!
//! The session idles out after `session.timeout_secs`; the customer id is
//! persisted separately and outlives it, so attribution stays reachable for
//! the whole window. Only a rotation or an invalidation replaces it.
//!
//! Issuing ids is the bootstrap call's job; this module only holds, slides,
//! rotates and invalidates what it was given.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tracker_cache::DurableStorage;
use tracker_core::clock::Clock;
use tracker_core::config::{AttributionConfig, SessionConfig};

/// Read side of the session, re-read by the attribution store on every call.
pub trait SessionSource: Send + Sync {
    fn customer_id(&self) -> Option<String>;
    fn session_id(&self) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub customer_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionState {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct CustomerState {
    customer_id: String,
    expires_at: DateTime<Utc>,
}

impl CustomerState {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && !self.customer_id.is_empty()
    }
}

fn expiry(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    now.checked_add_signed(timeout)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct SessionHolder {
    state: RwLock<Option<SessionState>>,
    customer: RwLock<Option<CustomerState>>,
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    customer_ttl: Duration,
    storage_key: String,
    customer_key: String,
}

impl SessionHolder {
    pub fn new(
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
        key_prefix: &str,
    ) -> Self {
        let timeout = i64::try_from(config.timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            state: RwLock::new(None),
            customer: RwLock::new(None),
            storage,
            clock,
            timeout,
            customer_ttl: AttributionConfig::default().window().max(timeout),
            storage_key: format!("{key_prefix}session"),
            customer_key: format!("{key_prefix}customer"),
        }
    }

    /// How long the customer id survives without activity. Never shorter
    /// than the session timeout.
    pub fn with_customer_ttl(mut self, ttl: Duration) -> Self {
        self.customer_ttl = ttl.max(self.timeout);
        self
    }

    /// Pick up the customer id and, if still live, the session persisted by
    /// an earlier page load. Returns the live session.
    pub fn restore(&self) -> Option<SessionState> {
        let now = self.clock.now();

        if let Some(customer) = self.load_persisted::<CustomerState>(&self.customer_key) {
            if customer.is_live(now) {
                *self.customer.write() = Some(customer);
            } else {
                debug!("persisted customer id expired");
                self.delete_persisted(&self.customer_key);
            }
        }

        let state = self.load_persisted::<SessionState>(&self.storage_key)?;
        if !state.is_live(now) {
            debug!(session_id = %state.session_id, "persisted session expired");
            self.delete_persisted(&self.storage_key);
            return None;
        }

        if self.customer.read().is_none() && !state.customer_id.is_empty() {
            self.set_customer(state.customer_id.clone(), now);
        }
        *self.state.write() = Some(state.clone());
        Some(state)
    }

    /// Adopt the ids returned by the session bootstrap call.
    pub fn start(
        &self,
        session_id: impl Into<String>,
        customer_id: impl Into<String>,
    ) -> SessionState {
        let now = self.clock.now();
        let state = SessionState {
            session_id: session_id.into(),
            customer_id: customer_id.into(),
            started_at: now,
            last_activity: now,
            expires_at: expiry(now, self.timeout),
        };
        info!(
            session_id = %state.session_id,
            customer_id = %state.customer_id,
            "session started"
        );
        self.persist(&self.storage_key, &state, state.expires_at);
        *self.state.write() = Some(state.clone());
        self.set_customer(state.customer_id.clone(), now);
        state
    }

    /// Slide the idle timeout and the customer id's lifetime. An expired
    /// session is dropped; the customer id is kept while it is live.
    pub fn touch(&self) {
        let now = self.clock.now();
        self.touch_session(now);

        let mut guard = self.customer.write();
        let Some(customer) = guard.as_mut() else {
            return;
        };
        if !customer.is_live(now) {
            debug!(customer_id = %customer.customer_id, "customer id expired");
            *guard = None;
            drop(guard);
            self.delete_persisted(&self.customer_key);
            return;
        }
        customer.expires_at = expiry(now, self.customer_ttl);
        let snapshot = customer.clone();
        drop(guard);
        self.persist(&self.customer_key, &snapshot, snapshot.expires_at);
    }

    fn touch_session(&self, now: DateTime<Utc>) {
        let mut guard = self.state.write();
        let Some(state) = guard.as_mut() else {
            return;
        };
        if !state.is_live(now) {
            debug!(session_id = %state.session_id, "session idled out");
            *guard = None;
            drop(guard);
            self.delete_persisted(&self.storage_key);
            return;
        }
        state.last_activity = now;
        state.expires_at = expiry(now, self.timeout);
        let snapshot = state.clone();
        drop(guard);
        self.persist(&self.storage_key, &snapshot, snapshot.expires_at);
    }

    /// Swap the customer id. Records stored under the old id are orphaned.
    pub fn rotate_customer(&self, customer_id: impl Into<String>) {
        let customer_id = customer_id.into();
        let now = self.clock.now();
        info!(
            old_customer_id = ?self.customer_id(),
            new_customer_id = %customer_id,
            "customer id rotated"
        );

        let mut guard = self.state.write();
        if let Some(state) = guard.as_mut() {
            state.customer_id = customer_id.clone();
            let snapshot = state.clone();
            drop(guard);
            self.persist(&self.storage_key, &snapshot, snapshot.expires_at);
        } else {
            drop(guard);
        }
        self.set_customer(customer_id, now);
    }

    /// End the session and forget the customer id.
    pub fn invalidate(&self) {
        if let Some(state) = self.state.write().take() {
            info!(session_id = %state.session_id, "session invalidated");
        }
        self.customer.write().take();
        self.delete_persisted(&self.storage_key);
        self.delete_persisted(&self.customer_key);
    }

    /// The live session, if any.
    pub fn current(&self) -> Option<SessionState> {
        let now = self.clock.now();
        self.state
            .read()
            .as_ref()
            .filter(|state| state.is_live(now))
            .cloned()
    }

    fn set_customer(&self, customer_id: String, now: DateTime<Utc>) {
        let customer = CustomerState {
            customer_id,
            expires_at: expiry(now, self.customer_ttl),
        };
        self.persist(&self.customer_key, &customer, customer.expires_at);
        *self.customer.write() = Some(customer);
    }

    fn load_persisted<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read persisted session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding corrupt persisted session");
                self.delete_persisted(key);
                None
            }
        }
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T, expires_at: DateTime<Utc>) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize session");
                return;
            }
        };
        if let Err(e) = self.storage.set(key, &json, Some(expires_at)) {
            warn!(key = %key, error = %e, "failed to persist session");
        }
    }

    fn delete_persisted(&self, key: &str) {
        if let Err(e) = self.storage.delete(key) {
            warn!(key = %key, error = %e, "failed to delete persisted session");
        }
    }
}

impl SessionSource for SessionHolder {
    fn customer_id(&self) -> Option<String> {
        let now = self.clock.now();
        self.customer
            .read()
            .as_ref()
            .filter(|customer| customer.is_live(now))
            .map(|customer| customer.customer_id.clone())
    }

    fn session_id(&self) -> Option<String> {
        self.current()
            .map(|state| state.session_id)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracker_cache::LocalStorage;
    use tracker_core::clock::ManualClock;

    fn new_holder(storage: &Arc<LocalStorage>, clock: &Arc<ManualClock>) -> SessionHolder {
        SessionHolder::new(
            storage.clone(),
            clock.clone(),
            &SessionConfig { timeout_secs: 60 },
            "trk_",
        )
        .with_customer_ttl(Duration::seconds(600))
    }

    fn setup() -> (Arc<LocalStorage>, Arc<ManualClock>, SessionHolder) {
        let storage = Arc::new(LocalStorage::new(1024 * 1024));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let holder = new_holder(&storage, &clock);
        (storage, clock, holder)
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_start_and_read() {
        let (storage, _, holder) = setup();
        assert_eq!(holder.customer_id(), None);

        holder.start("S1", "CUST1");
        assert_eq!(holder.customer_id().as_deref(), Some("CUST1"));
        assert_eq!(holder.session_id().as_deref(), Some("S1"));
        assert_eq!(storage.keys(), keys(&["trk_customer", "trk_session"]));
    }

    #[test]
    fn test_restore_across_page_loads() {
        let (storage, clock, holder) = setup();
        holder.start("S1", "CUST1");

        let reloaded = new_holder(&storage, &clock);
        let restored = reloaded.restore().unwrap();
        assert_eq!(restored.customer_id, "CUST1");
        assert_eq!(reloaded.customer_id().as_deref(), Some("CUST1"));
    }

    #[test]
    fn test_idle_session_keeps_customer() {
        let (storage, clock, holder) = setup();
        holder.start("S1", "CUST1");

        clock.advance(Duration::seconds(50));
        holder.touch();
        clock.advance(Duration::seconds(50));
        assert!(holder.session_id().is_some());

        clock.advance(Duration::seconds(11));
        assert_eq!(holder.session_id(), None);
        assert_eq!(holder.customer_id().as_deref(), Some("CUST1"));
        holder.touch();
        assert_eq!(storage.keys(), keys(&["trk_customer"]));

        let reloaded = new_holder(&storage, &clock);
        assert!(reloaded.restore().is_none());
        assert_eq!(reloaded.customer_id().as_deref(), Some("CUST1"));
    }

    #[test]
    fn test_customer_expires_after_ttl_without_activity() {
        let (storage, clock, holder) = setup();
        holder.start("S1", "CUST1");

        clock.advance(Duration::seconds(500));
        holder.touch();
        clock.advance(Duration::seconds(500));
        assert_eq!(holder.customer_id().as_deref(), Some("CUST1"));

        clock.advance(Duration::seconds(101));
        assert_eq!(holder.customer_id(), None);
        holder.touch();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_customer_ttl_never_below_session_timeout() {
        let storage = Arc::new(LocalStorage::new(1024 * 1024));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let holder = SessionHolder::new(
            storage,
            clock.clone(),
            &SessionConfig { timeout_secs: 60 },
            "trk_",
        )
        .with_customer_ttl(Duration::seconds(1));
        holder.start("S1", "CUST1");
        clock.advance(Duration::seconds(59));
        assert_eq!(holder.customer_id().as_deref(), Some("CUST1"));
    }

    #[test]
    fn test_restore_drops_stale_and_corrupt() {
        let (storage, clock, holder) = setup();
        holder.start("S1", "CUST1");
        clock.advance(Duration::seconds(61));
        assert!(holder.restore().is_none());
        assert_eq!(storage.keys(), keys(&["trk_customer"]));

        storage.set("trk_session", "{not json", None).unwrap();
        storage.set("trk_customer", "{not json", None).unwrap();
        let reloaded = new_holder(&storage, &clock);
        assert!(reloaded.restore().is_none());
        assert_eq!(reloaded.customer_id(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_rotate_and_invalidate() {
        let (storage, _, holder) = setup();
        holder.start("S1", "CUST1");
        holder.rotate_customer("CUST2");
        assert_eq!(holder.customer_id().as_deref(), Some("CUST2"));
        assert_eq!(holder.current().unwrap().customer_id, "CUST2");
        assert!(storage.get("trk_customer").unwrap().unwrap().contains("CUST2"));
        assert!(storage.get("trk_session").unwrap().unwrap().contains("CUST2"));

        holder.invalidate();
        assert_eq!(holder.customer_id(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_rotate_without_live_session() {
        let (_, clock, holder) = setup();
        holder.start("S1", "CUST1");
        clock.advance(Duration::seconds(61));
        holder.rotate_customer("CUST2");
        assert_eq!(holder.session_id(), None);
        assert_eq!(holder.customer_id().as_deref(), Some("CUST2"));
    }
}
