//! Configuration for mcshield

use serde::Deserialize;
use std::time::Duration;

/// Default time-to-live for stored values (7 days)
pub const DEFAULT_TTL_SECS: u32 = 7 * 24 * 3600;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: MemcachedCacheConfig,
    pub metrics: MetricsConfig,
}

/// Memcached cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemcachedCacheConfig {
    /// Server list, e.g. "10.0.0.1:11211 10.0.0.2:11211" (comma or space separated)
    pub hosts: String,

    /// Per-operation timeout in milliseconds
    pub timeout_ms: u64,

    /// Largest object the backend accepts (bytes); half of it is the compression threshold
    pub max_object_size: usize,

    /// Maximum in-flight operations (0 = unbounded)
    pub max_operation_queue_size: usize,

    /// Compress values above the threshold
    pub enable_compression: bool,

    /// Read buffer size per connection (bytes)
    pub read_buffer_size: usize,

    /// Deployment environment, used as the key namespace
    pub deploy_env: String,

    /// Per-cache key prefix
    pub prefix: String,

    /// Time-to-live passed to the backend on store
    pub ttl_secs: u32,
}

impl Default for MemcachedCacheConfig {
    fn default() -> Self {
        Self {
            hosts: "127.0.0.1:11211".to_string(),
            timeout_ms: 500,
            max_object_size: 1024 * 1024, // memcached default item size
            max_operation_queue_size: 0,
            enable_compression: true,
            read_buffer_size: 16 * 1024,
            deploy_env: String::new(),
            prefix: String::new(),
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl MemcachedCacheConfig {
    /// Operation timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Size above which values are compressed
    pub fn compress_threshold(&self) -> usize {
        self.max_object_size / 2
    }
}

/// Metrics and health endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve the metrics/health HTTP endpoint
    pub enabled: bool,

    /// Address for metrics/health HTTP server
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::CacheError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        toml::from_str(contents)
            .map_err(|e| crate::CacheError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(hosts) = std::env::var("MCSHIELD_HOSTS") {
            config.cache.hosts = hosts;
        }

        if let Some(ms) = env_parse("MCSHIELD_TIMEOUT_MS") {
            config.cache.timeout_ms = ms;
        }

        if let Some(size) = env_parse("MCSHIELD_MAX_OBJECT_SIZE") {
            config.cache.max_object_size = size;
        }

        if let Some(size) = env_parse("MCSHIELD_MAX_QUEUE_SIZE") {
            config.cache.max_operation_queue_size = size;
        }

        if let Ok(enabled) = std::env::var("MCSHIELD_ENABLE_COMPRESSION") {
            config.cache.enable_compression = parse_bool(&enabled);
        }

        if let Ok(env) = std::env::var("MCSHIELD_DEPLOY_ENV") {
            config.cache.deploy_env = env;
        }

        if let Ok(prefix) = std::env::var("MCSHIELD_PREFIX") {
            config.cache.prefix = prefix;
        }

        if let Some(ttl) = env_parse("MCSHIELD_TTL_SECS") {
            config.cache.ttl_secs = ttl;
        }

        if let Ok(addr) = std::env::var("MCSHIELD_METRICS_ADDR") {
            config.metrics.listen_addr = addr;
        }

        if let Ok(enabled) = std::env::var("MCSHIELD_METRICS_ENABLED") {
            config.metrics.enabled = parse_bool(&enabled);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
