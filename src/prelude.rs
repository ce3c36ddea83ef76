//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use mcshield::prelude::*;
//! ```

// Error types
pub use crate::error::{CacheError, ClientError, DecodeError, ProtocolError, Result};

// Configuration
pub use crate::config::{Config, MemcachedCacheConfig, MetricsConfig};

// Cache
pub use crate::cache::{GetOutcome, MemcachedCache};
pub use crate::codec::ValueCodec;
pub use crate::compression::CompressionPolicy;
pub use crate::key::KeyHasher;

// Client
pub use crate::client::{CacheClient, MemcachedClient, OpFuture};

// Statistics
pub use crate::health::HealthServer;
pub use crate::stats::{CacheStats, CacheStatsSnapshot};

// Common external crates
pub use bytes::Bytes;
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
