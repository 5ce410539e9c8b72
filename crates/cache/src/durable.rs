//! Durable key-value storage adapter (L2).
//!
//! Two interchangeable backends behind [`DurableStorage`]:
//! - [`CookieStorage`] — small per-entry budget, sent with every request to
//!   the site's domain, expiry enforced by the jar itself.
//! - [`LocalStorage`] — larger same-origin store that never expires anything.
//!
//! Callers must not rely on backend expiry: the local backend keeps stale
//! values forever, so liveness is always re-checked at the application level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;
use url::{form_urlencoded, Host, Url};

use tracker_core::clock::Clock;
use tracker_core::config::{StorageConfig, StorageType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage quota exceeded for {key}: {size} bytes > {limit} bytes")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Get/set/delete of string values by key.
pub trait DurableStorage: Send + Sync {
    fn kind(&self) -> StorageType;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// `expires_at` is honoured by backends that support expiry and ignored otherwise.
    fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Select the configured backend.
pub fn build_storage(config: &StorageConfig, clock: Arc<dyn Clock>) -> Arc<dyn DurableStorage> {
    match config.storage_type {
        StorageType::Cookie => Arc::new(
            CookieStorage::new(clock, config.max_cookie_bytes)
                .with_domain(config.cookie_domain.clone()),
        ),
        StorageType::Local => Arc::new(LocalStorage::new(config.local_quota_bytes)),
    }
}

// ─── Cookie jar ─────────────────────────────────────────────────────────────

struct Cookie {
    /// Percent-encoded, as it would travel on the wire.
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Cookie-backed storage scoped to one (optionally shared) domain.
pub struct CookieStorage {
    jar: DashMap<String, Cookie>,
    domain: Option<String>,
    max_entry_bytes: usize,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
}

impl CookieStorage {
    pub fn new(clock: Arc<dyn Clock>, max_entry_bytes: usize) -> Self {
        Self {
            jar: DashMap::new(),
            domain: None,
            max_entry_bytes,
            clock,
            enabled: AtomicBool::new(true),
        }
    }

    /// Share cookies with every subdomain of `domain`.
    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Simulate the user blocking cookies.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.enabled.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("cookies are disabled".into()))
        }
    }

    fn is_expired(&self, cookie: &Cookie, now: DateTime<Utc>) -> bool {
        cookie.expires_at.is_some_and(|at| at <= now)
    }

    /// `Cookie` request header for every live cookie, sorted by name. Names
    /// are percent-encoded like values.
    pub fn cookie_header(&self) -> String {
        let now = self.clock.now();
        let mut pairs: Vec<(String, String)> = self
            .jar
            .iter()
            .filter(|entry| !self.is_expired(entry.value(), now))
            .map(|entry| (encode_cookie_value(entry.key()), entry.value().value.clone()))
            .collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// `Set-Cookie` response header that would (re)create `key`.
    pub fn set_cookie_header(&self, key: &str) -> Option<String> {
        let cookie = self.jar.get(key)?;
        let mut header = format!("{}={}; Path=/", encode_cookie_value(key), cookie.value);
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={domain}"));
        }
        if let Some(expires_at) = cookie.expires_at {
            header.push_str(&format!(
                "; Expires={}",
                expires_at.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        header.push_str("; SameSite=Lax");
        Some(header)
    }

    pub fn len(&self) -> usize {
        self.jar.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jar.is_empty()
    }
}

fn encode_cookie_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn decode_cookie_value(encoded: &str) -> String {
    // Encoded values never contain '=' or '&', so they parse as a single bare name.
    form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map(|(name, _)| name.into_owned())
        .unwrap_or_default()
}

impl DurableStorage for CookieStorage {
    fn kind(&self) -> StorageType {
        StorageType::Cookie
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        let now = self.clock.now();
        let Some(cookie) = self.jar.get(key) else {
            return Ok(None);
        };
        if self.is_expired(cookie.value(), now) {
            drop(cookie);
            self.jar.remove(key);
            debug!(key = key, "cookie expired");
            return Ok(None);
        }
        Ok(Some(decode_cookie_value(&cookie.value)))
    }

    fn set(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.check_enabled()?;
        let encoded = encode_cookie_value(value);
        let size = encode_cookie_value(key).len() + encoded.len();
        if size > self.max_entry_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                size,
                limit: self.max_entry_bytes,
            });
        }
        // A cookie set in the past is a deletion.
        if expires_at.is_some_and(|at| at <= self.clock.now()) {
            self.jar.remove(key);
            return Ok(());
        }
        self.jar.insert(
            key.to_string(),
            Cookie {
                value: encoded,
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.jar.remove(key);
        Ok(())
    }
}

/// Registrable cookie domain for a page, e.g. `https://shop.example.com/x`
/// yields `.example.com`. None for IP hosts and single-label hosts.
///
/// Takes the last two labels; multi-label public suffixes such as `co.uk`
/// need an explicit `cookie_domain` in config.
pub fn cookie_domain_for(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    match url.host()? {
        Host::Domain(host) => {
            let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
            if labels.len() < 2 {
                return None;
            }
            Some(format!(".{}", labels[labels.len() - 2..].join(".")))
        }
        Host::Ipv4(_) | Host::Ipv6(_) => None,
    }
}

// ─── Local storage ──────────────────────────────────────────────────────────

/// Same-origin persistent storage with a total byte quota.
pub struct LocalStorage {
    items: DashMap<String, String>,
    quota_bytes: usize,
    enabled: AtomicBool,
}

impl LocalStorage {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            items: DashMap::new(),
            quota_bytes,
            enabled: AtomicBool::new(true),
        }
    }

    /// Simulate private-mode browsers that reject storage access.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.enabled.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("local storage is disabled".into()))
        }
    }

    fn used_bytes(&self) -> usize {
        self.items
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl DurableStorage for LocalStorage {
    fn kind(&self) -> StorageType {
        StorageType::Local
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.items.get(key).map(|v| v.value().clone()))
    }

    fn set(
        &self,
        key: &str,
        value: &str,
        _expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.check_enabled()?;
        let existing = self
            .items
            .get(key)
            .map(|v| key.len() + v.value().len())
            .unwrap_or(0);
        let size = self.used_bytes() - existing + key.len() + value.len();
        if size > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                size,
                limit: self.quota_bytes,
            });
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.items.remove(key);
        Ok(())
    }
}
