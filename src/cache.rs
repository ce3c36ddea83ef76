//! Memcached cache facade
//!
//! Hashes keys, wraps values in the collision-safe encoding, issues the
//! backend operation and keeps statistics. Backend failures never reach the
//! caller: a broken cache looks like an always-empty cache.

use crate::client::{CacheClient, MemcachedClient};
use crate::codec::ValueCodec;
use crate::compression::CompressionPolicy;
use crate::config::MemcachedCacheConfig;
use crate::key::KeyHasher;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::{CacheError, ClientError, DecodeError};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

const UNABLE_TO_QUEUE: &str = "Unable to queue cache operation";

/// How a lookup ended
///
/// Every variant except [`GetOutcome::Hit`] reads as empty bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    Hit(Bytes),
    Miss,
    /// Backend key matched but the embedded original key did not
    Collision,
    /// Stored bytes could not be decoded
    Corrupt,
    Timeout,
    /// Operation could not be issued or failed while executing
    Error,
}

impl GetOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, GetOutcome::Hit(_))
    }

    /// Payload on hit, empty otherwise
    pub fn into_bytes(self) -> Bytes {
        match self {
            GetOutcome::Hit(bytes) => bytes,
            _ => Bytes::new(),
        }
    }
}

/// Cache facade over a [`CacheClient`]
pub struct MemcachedCache {
    client: Arc<dyn CacheClient>,
    hasher: KeyHasher,
    codec: ValueCodec,
    stats: Arc<CacheStats>,
    timeout: Duration,
    ttl_secs: u32,
}

impl MemcachedCache {
    /// Create a cache over an existing client
    ///
    /// Fails if the configured namespace or prefix cannot fit a backend key.
    pub fn new(
        client: Arc<dyn CacheClient>,
        config: &MemcachedCacheConfig,
        stats: Arc<CacheStats>,
    ) -> crate::Result<Self> {
        let hasher = KeyHasher::new(config.deploy_env.clone(), config.prefix.clone())?;
        Ok(Self::with_hasher(client, hasher, config, stats))
    }

    fn with_hasher(
        client: Arc<dyn CacheClient>,
        hasher: KeyHasher,
        config: &MemcachedCacheConfig,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            client,
            hasher,
            codec: ValueCodec::new(CompressionPolicy::from_config(config)),
            stats,
            timeout: config.timeout(),
            ttl_secs: config.ttl_secs,
        }
    }

    /// Build the TCP client from configuration and wrap it
    ///
    /// Key settings are validated before any host is resolved.
    pub async fn connect(config: &MemcachedCacheConfig) -> crate::Result<Self> {
        let hasher = KeyHasher::new(config.deploy_env.clone(), config.prefix.clone())?;
        let client = MemcachedClient::connect(config).await?;
        let stats = Arc::new(CacheStats::new()?);
        Ok(Self::with_hasher(Arc::new(client), hasher, config, stats))
    }

    /// Cache name (its key prefix)
    pub fn name(&self) -> &str {
        self.hasher.prefix()
    }

    /// Shared statistics handle
    pub fn stats_handle(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Approximate point-in-time statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Backend key for an original key
    pub fn backend_key(&self, key: &str) -> String {
        self.hasher.hash(key)
    }

    /// Look up a value; empty bytes on miss, collision, timeout or backend error
    ///
    /// Only an interrupted wait (client shut down underneath the call) is
    /// returned as an error.
    pub async fn get(&self, key: &str) -> crate::Result<Bytes> {
        self.get_outcome(key).await.map(GetOutcome::into_bytes)
    }

    /// Look up a value and report how the lookup ended
    pub async fn get_outcome(&self, key: &str) -> crate::Result<GetOutcome> {
        if key.is_empty() {
            return Ok(GetOutcome::Miss);
        }
        let hashed = self.hasher.hash(key);

        let start = Instant::now();
        let mut pending = match self.client.get(&hashed) {
            Ok(pending) => pending,
            Err(e) => {
                self.stats.record_error();
                error!(key = %hashed, error = %e, "{UNABLE_TO_QUEUE}");
                return Ok(GetOutcome::Error);
            }
        };

        let fetched = match tokio::time::timeout(self.timeout, &mut pending).await {
            Err(_) => {
                self.stats.record_timeout();
                pending.abort();
                debug!(key = %hashed, timeout = ?self.timeout, "Cache get timed out");
                return Ok(GetOutcome::Timeout);
            }
            Ok(Ok(Ok(fetched))) => fetched,
            Ok(Ok(Err(ClientError::Timeout))) => {
                self.stats.record_timeout();
                debug!(key = %hashed, "Cache get timed out in client");
                return Ok(GetOutcome::Timeout);
            }
            Ok(Ok(Err(ClientError::Shutdown))) => {
                return Err(CacheError::Interrupted(format!(
                    "client shut down while fetching {hashed}"
                )));
            }
            Ok(Ok(Err(e))) => {
                self.stats.record_error();
                error!(key = %hashed, error = %e, "Error fetching key from cache");
                return Ok(GetOutcome::Error);
            }
            Ok(Err(join_err)) if join_err.is_cancelled() => {
                return Err(CacheError::Interrupted(format!(
                    "fetch of {hashed} was cancelled"
                )));
            }
            Ok(Err(join_err)) => {
                self.stats.record_error();
                error!(key = %hashed, error = %join_err, "Cache fetch task failed");
                return Ok(GetOutcome::Error);
            }
        };

        let elapsed = start.elapsed();
        match fetched {
            None => {
                self.stats.record_miss(elapsed);
                trace!(key = %hashed, "Cache miss");
                Ok(GetOutcome::Miss)
            }
            Some(encoded) => {
                self.stats.record_hit(encoded.len(), elapsed);
                Ok(self.decode(key, &hashed, &encoded))
            }
        }
    }

    fn decode(&self, key: &str, hashed: &str, encoded: &Bytes) -> GetOutcome {
        match self.codec.decode(key.as_bytes(), encoded) {
            Ok(payload) => GetOutcome::Hit(payload),
            Err(DecodeError::Empty) => GetOutcome::Miss,
            Err(DecodeError::Collision) => {
                self.stats.record_collision();
                error!(key = %hashed, "Keys do not match, possible hash collision!");
                GetOutcome::Collision
            }
            Err(e) => {
                error!(key = %hashed, error = %e, "Unable to decode cached value");
                GetOutcome::Corrupt
            }
        }
    }

    /// Store a value with the configured TTL (fire-and-forget)
    pub fn put(&self, key: &str, value: &[u8]) {
        self.put_with_ttl(key, value, self.ttl_secs);
    }

    /// Store a value with an explicit TTL (fire-and-forget)
    pub fn put_with_ttl(&self, key: &str, value: &[u8], ttl_secs: u32) {
        if key.is_empty() {
            return;
        }
        let hashed = self.hasher.hash(key);

        let encoded = match self.codec.encode(key.as_bytes(), value) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                self.stats.record_error();
                error!(key = %hashed, error = %e, "Unable to encode cache value");
                return;
            }
        };

        let len = encoded.len();
        match self.client.set(&hashed, ttl_secs, encoded) {
            Ok(()) => self.stats.record_put(len),
            Err(e) => {
                self.stats.record_error();
                error!(key = %hashed, error = %e, "{UNABLE_TO_QUEUE}");
            }
        }
    }

    /// Remove a key; the backend result is not inspected
    pub fn evict(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let hashed = self.hasher.hash(key);
        if let Err(e) = self.client.delete(&hashed) {
            self.stats.record_error();
            error!(key = %hashed, error = %e, "{UNABLE_TO_QUEUE}");
        }
    }

    /// Memcached has no pattern invalidation, so this clears everything
    pub async fn clear_by_type(&self, pattern: &str) {
        debug!(pattern, "Clear by pattern widened to a full cache clear");
        self.clear().await;
    }

    /// Flush every backend server
    ///
    /// Waits for the flush without a timeout of its own; failures are logged.
    pub async fn clear(&self) {
        warn!("Clear remote cache!");
        let pending = match self.client.flush() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Can't clear remote cache");
                return;
            }
        };
        match pending.await {
            Ok(Ok(result)) => warn!(result, "Clear remote cache returned"),
            Ok(Err(e)) => warn!(error = %e, "Can't clear remote cache"),
            Err(e) => warn!(error = %e, "Clear remote cache was interrupted"),
        }
    }

    /// Serialize `value` as JSON and store it
    pub fn put_value<T: Serialize>(&self, key: &str, value: &T) -> crate::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes);
        Ok(())
    }

    /// Fetch and deserialize a JSON value; undecodable values read as absent
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> crate::Result<Option<T>> {
        let bytes = self.get(key).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(error = %e, "Cached value does not deserialize, treating as miss");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for MemcachedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedCache")
            .field("hasher", &self.hasher)
            .field("timeout", &self.timeout)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OpFuture;
    use crate::codec::{FLAG_COMPRESSED, FLAG_UNCOMPRESSED, flag_of};
    use crate::key::MAX_PREFIX_LENGTH;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    enum Mode {
        #[default]
        Healthy,
        /// Every key lands in the same slot
        Colliding,
        QueueFull,
        /// Fetches never complete
        Hang,
        /// Fetches fail while executing
        Failing,
        /// Fetches end with the client shutting down
        Shutdown,
        /// Fetch handles come back already cancelled
        Cancelled,
    }

    /// Sets a flag when the owning future is dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockClient {
        mode: Mode,
        store: Arc<parking_lot::Mutex<HashMap<String, Bytes>>>,
        gets: AtomicUsize,
        sets: parking_lot::Mutex<Vec<(String, u32)>>,
        deletes: parking_lot::Mutex<Vec<String>>,
        flushes: AtomicUsize,
        hang_dropped: Arc<AtomicBool>,
    }

    impl MockClient {
        fn with_mode(mode: Mode) -> Self {
            Self {
                mode,
                ..Self::default()
            }
        }

        fn slot(&self, key: &str) -> String {
            match self.mode {
                Mode::Colliding => "shared-slot".to_string(),
                _ => key.to_string(),
            }
        }

        fn stored(&self, key: &str) -> Option<Bytes> {
            self.store.lock().get(&self.slot(key)).cloned()
        }

        fn calls(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
                + self.sets.lock().len()
                + self.deletes.lock().len()
                + self.flushes.load(Ordering::SeqCst)
        }
    }

    impl CacheClient for MockClient {
        fn get(&self, key: &str) -> Result<OpFuture<Option<Bytes>>, ClientError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::QueueFull => Err(ClientError::QueueFull),
                Mode::Hang => {
                    let flag = DropFlag(Arc::clone(&self.hang_dropped));
                    Ok(tokio::spawn(async move {
                        let _flag = flag;
                        std::future::pending::<()>().await;
                        Ok(None)
                    }))
                }
                Mode::Failing => Ok(tokio::spawn(async {
                    Err(ClientError::Server("SERVER_ERROR busy".to_string()))
                })),
                Mode::Shutdown => Ok(tokio::spawn(async { Err(ClientError::Shutdown) })),
                Mode::Cancelled => {
                    let handle = tokio::spawn(async {
                        std::future::pending::<()>().await;
                        Ok(None)
                    });
                    handle.abort();
                    Ok(handle)
                }
                Mode::Healthy | Mode::Colliding => {
                    let value = self.stored(key);
                    Ok(tokio::spawn(async move { Ok(value) }))
                }
            }
        }

        fn set(&self, key: &str, ttl_secs: u32, value: Bytes) -> Result<(), ClientError> {
            if self.mode == Mode::QueueFull {
                return Err(ClientError::QueueFull);
            }
            self.sets.lock().push((key.to_string(), ttl_secs));
            self.store.lock().insert(self.slot(key), value);
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<(), ClientError> {
            self.deletes.lock().push(key.to_string());
            self.store.lock().remove(&self.slot(key));
            Ok(())
        }

        fn flush(&self) -> Result<OpFuture<bool>, ClientError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.store.lock().clear();
            Ok(tokio::spawn(async { Ok(true) }))
        }
    }

    fn test_config() -> MemcachedCacheConfig {
        MemcachedCacheConfig {
            timeout_ms: 50,
            max_object_size: 1024,
            deploy_env: "test".to_string(),
            prefix: "query".to_string(),
            ..MemcachedCacheConfig::default()
        }
    }

    fn cache_with(client: &Arc<MockClient>, config: &MemcachedCacheConfig) -> MemcachedCache {
        let stats = Arc::new(CacheStats::new().unwrap());
        MemcachedCache::new(Arc::clone(client) as Arc<dyn CacheClient>, config, stats).unwrap()
    }

    fn mock(mode: Mode) -> (Arc<MockClient>, MemcachedCache) {
        let client = Arc::new(MockClient::with_mode(mode));
        let cache = cache_with(&client, &test_config());
        (client, cache)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (client, cache) = mock(Mode::Healthy);

        cache.put("select * from t", b"result rows");
        let value = cache.get("select * from t").await.unwrap();
        assert_eq!(value.as_ref(), b"result rows");

        let (hashed, ttl) = client.sets.lock()[0].clone();
        assert!(hashed.starts_with("test:query:"));
        assert_eq!(ttl, 7 * 24 * 3600);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 0);
        assert_eq!(stats.put_count, 1);
        assert!(stats.put_bytes > 0);
        assert_eq!(stats.read_bytes, stats.put_bytes);
    }

    #[tokio::test]
    async fn test_get_never_put_is_miss() {
        let (_, cache) = mock(Mode::Healthy);

        assert_eq!(cache.get_outcome("nope").await.unwrap(), GetOutcome::Miss);
        assert!(cache.get("nope").await.unwrap().is_empty());

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.hit_count, 0);
    }

    #[tokio::test]
    async fn test_empty_key_skips_backend() {
        let (client, cache) = mock(Mode::Healthy);

        assert!(cache.get("").await.unwrap().is_empty());
        cache.put("", b"value");
        cache.evict("");

        assert_eq!(client.calls(), 0);
        assert_eq!(cache.stats(), CacheStatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_put_with_ttl() {
        let (client, cache) = mock(Mode::Healthy);
        cache.put_with_ttl("k", b"v", 60);
        assert_eq!(client.sets.lock()[0].1, 60);
    }

    #[tokio::test]
    async fn test_collision_returns_empty() {
        let (_, cache) = mock(Mode::Colliding);

        cache.put("key-one", b"payload for one");
        let outcome = cache.get_outcome("key-two").await.unwrap();
        assert_eq!(outcome, GetOutcome::Collision);
        assert!(cache.get("key-two").await.unwrap().is_empty());

        let stats = cache.stats();
        assert_eq!(stats.collision_count, 2);
        // backend did answer, so these were hits at the transport level
        assert_eq!(stats.hit_count, 2);

        assert_eq!(
            cache.get("key-one").await.unwrap().as_ref(),
            b"payload for one"
        );
    }

    #[tokio::test]
    async fn test_corrupt_value_returns_empty() {
        let (client, cache) = mock(Mode::Healthy);
        let hashed = cache.backend_key("k");
        client
            .store
            .lock()
            .insert(hashed, Bytes::from_static(&[0, 1, 0xde, 0xad]));

        assert_eq!(cache.get_outcome("k").await.unwrap(), GetOutcome::Corrupt);
    }

    #[tokio::test]
    async fn test_timeout_counts_once_and_cancels() {
        let (client, cache) = mock(Mode::Hang);

        let outcome = cache.get_outcome("slow").await.unwrap();
        assert_eq!(outcome, GetOutcome::Timeout);

        let stats = cache.stats();
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.miss_count, 0);

        // aborted task drops its future
        for _ in 0..50 {
            if client.hang_dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pending fetch was not cancelled");
    }

    #[tokio::test]
    async fn test_queue_full_counts_error() {
        let (client, cache) = mock(Mode::QueueFull);

        assert_eq!(cache.get_outcome("k").await.unwrap(), GetOutcome::Error);
        cache.put("k", b"v");

        let stats = cache.stats();
        assert_eq!(stats.error_count, 2);
        assert_eq!(stats.put_count, 0);
        assert_eq!(stats.timeout_count, 0);
        assert_eq!(client.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execution_error_counts_error() {
        let (_, cache) = mock(Mode::Failing);

        assert!(cache.get("k").await.unwrap().is_empty());
        let stats = cache.stats();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.miss_count, 0);
    }

    #[tokio::test]
    async fn test_interrupted_get_is_fatal() {
        for mode in [Mode::Shutdown, Mode::Cancelled] {
            let (_, cache) = mock(mode);
            let result = cache.get("k").await;
            assert!(
                matches!(result, Err(CacheError::Interrupted(_))),
                "{mode:?}: {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_evict() {
        let (client, cache) = mock(Mode::Healthy);

        cache.put("k", b"v");
        cache.evict("k");

        assert_eq!(client.deletes.lock()[0], cache.backend_key("k"));
        assert!(cache.get("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_by_type_flushes_everything() {
        let (client, cache) = mock(Mode::Healthy);
        cache.put("a", b"1");

        for pattern in ["", "*", "project_a.*", "anything at all"] {
            cache.clear_by_type(pattern).await;
        }

        assert_eq!(client.flushes.load(Ordering::SeqCst), 4);
        assert!(cache.get("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compression_applied_above_threshold() {
        let (client, cache) = mock(Mode::Healthy);
        let key = "k";

        // threshold is 512: 4 + 1 + 507 = 512 stays uncompressed
        cache.put(key, &[b'x'; 507]);
        let stored = client.stored(&cache.backend_key(key)).unwrap();
        assert_eq!(flag_of(&stored), Some(FLAG_UNCOMPRESSED));

        cache.put(key, &[b'x'; 508]);
        let stored = client.stored(&cache.backend_key(key)).unwrap();
        assert_eq!(flag_of(&stored), Some(FLAG_COMPRESSED));
        assert_eq!(cache.get(key).await.unwrap().as_ref(), &[b'x'; 508]);
    }

    #[tokio::test]
    async fn test_compression_disabled() {
        let client = Arc::new(MockClient::default());
        let config = MemcachedCacheConfig {
            enable_compression: false,
            ..test_config()
        };
        let cache = cache_with(&client, &config);

        cache.put("k", &[b'x'; 4096]);
        let stored = client.stored(&cache.backend_key("k")).unwrap();
        assert_eq!(flag_of(&stored), Some(FLAG_UNCOMPRESSED));
    }

    #[tokio::test]
    async fn test_prefix_too_long_fails_without_backend() {
        let client = Arc::new(MockClient::default());
        let config = MemcachedCacheConfig {
            prefix: "p".repeat(MAX_PREFIX_LENGTH + 1),
            ..test_config()
        };
        let stats = Arc::new(CacheStats::new().unwrap());

        let result = MemcachedCache::new(Arc::clone(&client) as Arc<dyn CacheClient>, &config, stats);
        assert!(matches!(result, Err(CacheError::Config(_))));
        assert_eq!(client.calls(), 0);

        // validated before hosts are even resolved
        let config = MemcachedCacheConfig {
            hosts: String::new(),
            ..config
        };
        match MemcachedCache::connect(&config).await {
            Err(CacheError::Config(msg)) => assert!(msg.contains("prefix"), "{msg}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_values() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Row {
            id: u32,
            name: String,
        }

        let (_, cache) = mock(Mode::Healthy);
        let row = Row {
            id: 7,
            name: "seven".to_string(),
        };

        cache.put_value("row:7", &row).unwrap();
        assert_eq!(cache.get_value::<Row>("row:7").await.unwrap(), Some(row));
        assert_eq!(cache.get_value::<Row>("row:8").await.unwrap(), None);

        cache.put("row:9", b"not json");
        assert_eq!(cache.get_value::<Row>("row:9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_name_and_shared_stats() {
        let (_, cache) = mock(Mode::Healthy);
        assert_eq!(cache.name(), "query");

        let handle = Arc::clone(cache.stats_handle());
        let _ = cache.get("k").await.unwrap();
        assert_eq!(handle.snapshot().miss_count, 1);
    }
}
