//! Error types for mcshield

use thiserror::Error;

/// Main error type for mcshield
///
/// Operational backend failures never surface here; the cache absorbs them
/// and reports through [`crate::stats::CacheStats`]. What remains is either a
/// configuration mistake or a shutdown signal.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interrupted while waiting for cache operation: {0}")]
    Interrupted(String),

    #[error("Value serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors reported by a [`crate::client::CacheClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    /// Operation could not be queued (bounded queue exhausted)
    #[error("Operation queue is full")]
    QueueFull,

    /// Client is shut down or has no usable node
    #[error("Client not ready: {0}")]
    NotReady(String),

    /// Client was shut down while the operation was in flight
    #[error("Client shut down")]
    Shutdown,

    #[error("Operation timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Backend answered with ERROR / SERVER_ERROR / CLIENT_ERROR
    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Memcached ASCII response parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid response line: {0}")]
    InvalidResponse(String),

    #[error("Invalid VALUE header")]
    InvalidValueHeader,

    #[error("Value too large: {0} bytes")]
    ValueTooLarge(usize),

    #[error("Unexpected key in response: {0}")]
    UnexpectedKey(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key too long (max 250 bytes)")]
    KeyTooLong,

    #[error("Unexpected data")]
    UnexpectedData,
}

/// Encoded value decoding failures
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Nothing stored; not an error from the caller's point of view
    #[error("Empty value")]
    Empty,

    #[error("Keys do not match, possible hash collision")]
    Collision,

    #[error("Unknown compression flag {0}")]
    UnknownFlag(u16),

    #[error("Value truncated: {0}")]
    Truncated(&'static str),

    #[error("Decompressing value bytes failed: {0}")]
    Decompress(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
