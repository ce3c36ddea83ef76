//! Backend key derivation
//!
//! Memcached rejects keys longer than 250 bytes, so the original key is
//! replaced by its SHA-1 hex digest:
//!
//! ```text
//! <namespace>:<prefix>:<sha1-hex(original key)>
//! ```
//!
//! Empty segments are skipped along with their separator.

use crate::CacheError;
use crate::client::protocol::MAX_KEY_LENGTH;
use sha1::{Digest, Sha1};

/// Length of a SHA-1 hex digest
pub const DIGEST_HEX_LENGTH: usize = 40;

/// Longest namespace accepted (same budget as a digest)
pub const MAX_NAMESPACE_LENGTH: usize = DIGEST_HEX_LENGTH;

/// Longest prefix accepted: key limit minus namespace and key digest room and two separators
pub const MAX_PREFIX_LENGTH: usize = MAX_KEY_LENGTH - DIGEST_HEX_LENGTH - DIGEST_HEX_LENGTH - 2;

/// Derives bounded-length backend keys
#[derive(Debug, Clone)]
pub struct KeyHasher {
    namespace: String,
    prefix: String,
}

impl KeyHasher {
    /// Create a hasher, validating namespace and prefix up front
    pub fn new(namespace: impl Into<String>, prefix: impl Into<String>) -> crate::Result<Self> {
        let namespace = namespace.into();
        let prefix = prefix.into();

        if prefix.len() > MAX_PREFIX_LENGTH {
            return Err(CacheError::Config(format!(
                "memcached prefix length [{}] exceeds maximum length [{MAX_PREFIX_LENGTH}]",
                prefix.len()
            )));
        }
        if namespace.len() > MAX_NAMESPACE_LENGTH {
            return Err(CacheError::Config(format!(
                "namespace length [{}] exceeds maximum length [{MAX_NAMESPACE_LENGTH}]",
                namespace.len()
            )));
        }
        for (what, segment) in [("namespace", &namespace), ("prefix", &prefix)] {
            if !is_valid_segment(segment) {
                return Err(CacheError::Config(format!(
                    "{what} {segment:?} contains whitespace or control characters"
                )));
            }
        }

        Ok(Self { namespace, prefix })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Compute the backend key for an original key
    pub fn hash(&self, original_key: &str) -> String {
        let digest = hex::encode(Sha1::digest(original_key.as_bytes()));

        let mut key = String::with_capacity(
            self.namespace.len() + self.prefix.len() + DIGEST_HEX_LENGTH + 2,
        );
        for segment in [self.namespace.as_str(), self.prefix.as_str(), digest.as_str()] {
            if segment.is_empty() {
                continue;
            }
            if !key.is_empty() {
                key.push(':');
            }
            key.push_str(segment);
        }
        key
    }
}

/// Segments may be empty; otherwise printable ASCII without spaces
fn is_valid_segment(segment: &str) -> bool {
    segment.bytes().all(|b| b > 32 && b < 127)
}
