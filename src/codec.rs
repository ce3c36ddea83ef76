//! Collision-safe value encoding
//!
//! Binary format (big-endian):
//!
//! ```text
//! flag 0: [2 bytes: flag][4 bytes: key_len][key_len bytes: key][N bytes: payload]
//! flag 1: [2 bytes: flag][zlib([4 bytes: key_len][key][payload])]
//! ```
//!
//! The original key travels with the payload so a read can tell whether the
//! hashed backend key belonged to someone else.

use crate::DecodeError;
use crate::compression::{self, CompressionPolicy};
use bytes::{Buf, BufMut, Bytes};
use tracing::warn;

/// Payload stored as-is
pub const FLAG_UNCOMPRESSED: u16 = 0;
/// Inner layout zlib-compressed
pub const FLAG_COMPRESSED: u16 = 1;

const FLAG_LEN: usize = 2;
const KEY_LEN_LEN: usize = 4;

/// Length of the uncompressed inner layout for a key/payload pair
pub fn inner_len(key: &[u8], payload: &[u8]) -> usize {
    KEY_LEN_LEN + key.len() + payload.len()
}

/// Encode a key/payload pair, compressing the inner layout when asked
pub fn encode(key: &[u8], payload: &[u8], compressed: bool) -> std::io::Result<Vec<u8>> {
    let key_len = u32::try_from(key.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "key longer than u32::MAX")
    })?;

    if compressed {
        let mut inner = Vec::with_capacity(inner_len(key, payload));
        put_inner(&mut inner, key_len, key, payload);
        let blob = compression::compress(&inner)?;

        let mut buf = Vec::with_capacity(FLAG_LEN + blob.len());
        buf.put_u16(FLAG_COMPRESSED);
        buf.extend_from_slice(&blob);
        Ok(buf)
    } else {
        let mut buf = Vec::with_capacity(FLAG_LEN + inner_len(key, payload));
        buf.put_u16(FLAG_UNCOMPRESSED);
        put_inner(&mut buf, key_len, key, payload);
        Ok(buf)
    }
}

fn put_inner(buf: &mut Vec<u8>, key_len: u32, key: &[u8], payload: &[u8]) {
    buf.put_u32(key_len);
    buf.extend_from_slice(key);
    buf.extend_from_slice(payload);
}

/// Decode an encoded value, verifying the embedded key against `expected_key`
///
/// The payload is only returned when the embedded key matches byte for byte.
pub fn decode(expected_key: &[u8], encoded: &Bytes) -> Result<Bytes, DecodeError> {
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }
    if encoded.len() < FLAG_LEN {
        return Err(DecodeError::Truncated("missing compression flag"));
    }

    let mut buf = encoded.clone();
    let inner = match buf.get_u16() {
        FLAG_UNCOMPRESSED => buf,
        FLAG_COMPRESSED => {
            Bytes::from(compression::decompress(&buf).map_err(DecodeError::Decompress)?)
        }
        other => return Err(DecodeError::UnknownFlag(other)),
    };

    decode_inner(expected_key, inner)
}

fn decode_inner(expected_key: &[u8], mut inner: Bytes) -> Result<Bytes, DecodeError> {
    if inner.len() < KEY_LEN_LEN {
        return Err(DecodeError::Truncated("missing key length"));
    }
    let key_len = inner.get_u32() as usize;
    if key_len > inner.len() {
        return Err(DecodeError::Truncated("key length exceeds value size"));
    }

    let key = inner.split_to(key_len);
    if key.as_ref() != expected_key {
        return Err(DecodeError::Collision);
    }
    Ok(inner)
}

/// Encoder/decoder bound to a compression policy
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    policy: CompressionPolicy,
}

impl ValueCodec {
    pub fn new(policy: CompressionPolicy) -> Self {
        Self { policy }
    }

    /// Encode, compressing above the threshold
    ///
    /// A compression failure falls back to the uncompressed layout.
    pub fn encode(&self, key: &[u8], payload: &[u8]) -> std::io::Result<Vec<u8>> {
        if self.policy.should_compress(inner_len(key, payload)) {
            match encode(key, payload, true) {
                Ok(buf) => return Ok(buf),
                Err(e) => warn!(error = %e, "Compressing value bytes failed, storing uncompressed"),
            }
        }
        encode(key, payload, false)
    }

    pub fn decode(&self, expected_key: &[u8], encoded: &Bytes) -> Result<Bytes, DecodeError> {
        decode(expected_key, encoded)
    }
}

/// Read the compression flag of an encoded value
pub fn flag_of(encoded: &[u8]) -> Option<u16> {
    encoded
        .get(..FLAG_LEN)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}
