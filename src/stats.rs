//! Cache statistics
//!
//! Counters are Prometheus `IntCounter`s registered in a per-cache
//! [`Registry`], so the same lock-free counters back both the
//! [`CacheStatsSnapshot`] accessor and the text exposition.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Serialize;
use std::time::Duration;

/// Counters owned by one cache instance
pub struct CacheStats {
    registry: Registry,

    hits: IntCounter,
    misses: IntCounter,
    puts: IntCounter,
    put_bytes: IntCounter,
    read_bytes: IntCounter,
    timeouts: IntCounter,
    errors: IntCounter,
    collisions: IntCounter,
    get_time_ms: IntCounter,

    get_latency: Histogram,
}

/// Point-in-time copy of [`CacheStats`]
///
/// Not linearizable with respect to in-flight operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hit_count: u64,
    pub miss_count: u64,
    pub put_count: u64,
    pub put_bytes: u64,
    pub read_bytes: u64,
    pub timeout_count: u64,
    pub error_count: u64,
    pub collision_count: u64,
    /// Cumulative time spent in completed gets (milliseconds)
    pub get_time_ms: u64,
}

impl CacheStatsSnapshot {
    /// Total completed lookups
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Hit ratio over completed lookups
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            n => self.hit_count as f64 / n as f64,
        }
    }
}

impl CacheStats {
    /// Create a new stats instance
    ///
    /// Fails only if metric names collide inside the fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let hits = IntCounter::new("mcshield_get_hits_total", "Total GET hits")?;
        let misses = IntCounter::new("mcshield_get_misses_total", "Total GET misses")?;
        let puts = IntCounter::new("mcshield_puts_total", "Total values queued for store")?;
        let put_bytes =
            IntCounter::new("mcshield_put_bytes_total", "Total encoded bytes queued for store")?;
        let read_bytes =
            IntCounter::new("mcshield_read_bytes_total", "Total encoded bytes read on hits")?;
        let timeouts = IntCounter::new("mcshield_timeouts_total", "Total GET timeouts")?;
        let errors = IntCounter::new(
            "mcshield_errors_total",
            "Total operations failed at issue or execution",
        )?;
        let collisions = IntCounter::new(
            "mcshield_collisions_total",
            "Total hits rejected because the embedded key did not match",
        )?;
        let get_time_ms = IntCounter::new(
            "mcshield_get_time_milliseconds_total",
            "Cumulative GET time in milliseconds",
        )?;

        let get_latency = Histogram::with_opts(
            HistogramOpts::new("mcshield_get_latency_seconds", "GET latency in seconds").buckets(
                vec![
                    0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ],
            ),
        )?;

        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(misses.clone()))?;
        registry.register(Box::new(puts.clone()))?;
        registry.register(Box::new(put_bytes.clone()))?;
        registry.register(Box::new(read_bytes.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(collisions.clone()))?;
        registry.register(Box::new(get_time_ms.clone()))?;
        registry.register(Box::new(get_latency.clone()))?;

        Ok(Self {
            registry,
            hits,
            misses,
            puts,
            put_bytes,
            read_bytes,
            timeouts,
            errors,
            collisions,
            get_time_ms,
            get_latency,
        })
    }

    #[inline]
    pub(crate) fn record_hit(&self, bytes: usize, elapsed: Duration) {
        self.hits.inc();
        self.read_bytes.inc_by(bytes as u64);
        self.record_get_time(elapsed);
    }

    #[inline]
    pub(crate) fn record_miss(&self, elapsed: Duration) {
        self.misses.inc();
        self.record_get_time(elapsed);
    }

    #[inline]
    pub(crate) fn record_put(&self, bytes: usize) {
        self.puts.inc();
        self.put_bytes.inc_by(bytes as u64);
    }

    #[inline]
    pub(crate) fn record_timeout(&self) {
        self.timeouts.inc();
    }

    #[inline]
    pub(crate) fn record_error(&self) {
        self.errors.inc();
    }

    #[inline]
    pub(crate) fn record_collision(&self) {
        self.collisions.inc();
    }

    fn record_get_time(&self, elapsed: Duration) {
        self.get_time_ms
            .inc_by(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self.get_latency.observe(elapsed.as_secs_f64());
    }

    /// Copy all counters
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hit_count: self.hits.get(),
            miss_count: self.misses.get(),
            put_count: self.puts.get(),
            put_bytes: self.put_bytes.get(),
            read_bytes: self.read_bytes.get(),
            timeout_count: self.timeouts.get(),
            error_count: self.errors.get(),
            collision_count: self.collisions.get(),
            get_time_ms: self.get_time_ms.get(),
        }
    }

    /// Registry holding this cache's metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl std::fmt::Debug for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CacheStats").field(&self.snapshot()).finish()
    }
}
