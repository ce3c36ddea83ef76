//! # mcshield
//!
//! Collision-safe cache-access layer in front of a memcached cluster.
//!
//! Memcached limits keys to 250 bytes and cannot tell two keys apart once
//! they hash to the same slot. mcshield hashes application keys down to a
//! bounded backend key, stores the original key inside the value so a read
//! can detect collisions, compresses large values, and turns every backend
//! failure into a cache miss.
//!
//! ## Features
//!
//! - Namespaced SHA-1 backend keys (`<env>:<prefix>:<sha1>`)
//! - Embedded-key value format with zlib compression above a threshold
//! - Bounded-wait gets with cancellation on timeout
//! - Hit/miss/timeout/error statistics with Prometheus exposition
//! - Memcached ASCII client with consistent hashing and failover
//!
//! ## Example
//!
//! ```ignore
//! use mcshield::cache::MemcachedCache;
//! use mcshield::config::Config;
//!
//! let config = Config::from_env();
//! let cache = MemcachedCache::connect(&config.cache).await?;
//! cache.put("select * from orders", &rows);
//! let rows = cache.get("select * from orders").await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────────────┐     ┌───────────┐
//! │ application  │────▶│ MemcachedCache          │────▶│ memcached │
//! │              │     │  ├─ KeyHasher           │     │ servers   │
//! └──────────────┘     │  ├─ ValueCodec          │     └───────────┘
//!                      │  ├─ CacheStats          │
//!                      │  └─ CacheClient (TCP)   │
//!                      └─────────────────────────┘
//! ```

// Modules
pub mod cache;
pub mod client;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod health;
pub mod key;
pub mod prelude;
pub mod stats;

// Re-exports for convenience
pub use error::{CacheError, ClientError, DecodeError, ProtocolError, Result};
