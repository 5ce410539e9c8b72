use serde::Deserialize;

/// Root tracker configuration. Loaded from environment variables with the
/// prefix `TRACKER__` and an optional TOML config file underneath.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    /// How long a click stays attributable, in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

/// Which durable backend holds attribution records.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum StorageType {
    /// Cookie jar: small entries, shared with the site's subdomains, expires on its own.
    #[serde(rename = "durable-a", alias = "cookie")]
    Cookie,
    /// Same-origin local storage: larger, never expires anything.
    #[serde(rename = "durable-b", alias = "local")]
    Local,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "durable-a" | "cookie" => Ok(Self::Cookie),
            "durable-b" | "local" => Ok(Self::Local),
            other => Err(format!("unknown storage type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_type")]
    pub storage_type: StorageType,
    /// Cookie `Domain` attribute, e.g. `.example.com`. Host-only when unset.
    #[serde(default)]
    pub cookie_domain: Option<String>,
    #[serde(default = "default_max_cookie_bytes")]
    pub max_cookie_bytes: usize,
    #[serde(default = "default_local_quota_bytes")]
    pub local_quota_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

// Default functions
fn default_window_ms() -> u64 {
    2_592_000_000
}
fn default_key_prefix() -> String {
    "trk_".to_string()
}
fn default_cache_max_entries() -> usize {
    10_000
}
fn default_storage_type() -> StorageType {
    StorageType::Local
}
fn default_max_cookie_bytes() -> usize {
    4096
}
fn default_local_quota_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_session_timeout_secs() -> u64 {
    1800
}
fn default_batch_size() -> usize {
    20
}
fn default_flush_interval_ms() -> u64 {
    5000
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            key_prefix: default_key_prefix(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            cookie_domain: None,
            max_cookie_bytes: default_max_cookie_bytes(),
            local_quota_bytes: default_local_quota_bytes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl AttributionConfig {
    pub fn window(&self) -> chrono::Duration {
        i64::try_from(self.window_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_with_file(None)
    }

    /// Load configuration from an optional TOML file, overridden by the environment.
    pub fn load_with_file(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("TRACKER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
