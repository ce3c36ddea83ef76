//! Backend client abstraction and the memcached TCP client
//!
//! The cache only needs four operations and two failure signals from a
//! backend: issuing can fail immediately (queue full, not ready), and a
//! pending operation can fail or be interrupted while awaited.

pub mod locator;
pub mod memcached;
pub mod protocol;

use crate::ClientError;
use bytes::Bytes;
use tokio::task::JoinHandle;

pub use locator::{KetamaLocator, resolve_hosts};
pub use memcached::MemcachedClient;

/// Handle to an operation running on the client's runtime
///
/// Aborting the handle is best-effort cancellation.
pub type OpFuture<T> = JoinHandle<Result<T, ClientError>>;

/// Asynchronous key-value backend
pub trait CacheClient: Send + Sync {
    /// Fetch a value; `None` is a miss
    fn get(&self, key: &str) -> Result<OpFuture<Option<Bytes>>, ClientError>;

    /// Store a value, fire-and-forget
    fn set(&self, key: &str, ttl_secs: u32, value: Bytes) -> Result<(), ClientError>;

    /// Delete a key, fire-and-forget
    fn delete(&self, key: &str) -> Result<(), ClientError>;

    /// Invalidate everything on every server
    fn flush(&self) -> Result<OpFuture<bool>, ClientError>;
}
