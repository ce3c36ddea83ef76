//! Compression decision and zlib helpers

use crate::config::MemcachedCacheConfig;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Decides when a value is worth compressing
#[derive(Debug, Clone, Copy)]
pub struct CompressionPolicy {
    enabled: bool,
    threshold: usize,
}

impl CompressionPolicy {
    pub fn new(enabled: bool, max_object_size: usize) -> Self {
        Self {
            enabled,
            threshold: max_object_size / 2,
        }
    }

    pub fn from_config(config: &MemcachedCacheConfig) -> Self {
        Self {
            enabled: config.enable_compression,
            threshold: config.compress_threshold(),
        }
    }

    /// Never compress
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            threshold: usize::MAX,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// `combined_len` is the uncompressed inner layout length
    pub fn should_compress(&self, combined_len: usize) -> bool {
        self.enabled && combined_len > self.threshold
    }
}

/// zlib-compress at best compression
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
