//! Memcached ASCII protocol, client side
//!
//! Requests are built into a reusable [`BytesMut`]; responses are parsed
//! incrementally, one response line (plus data block for VALUE) at a time.

use crate::ProtocolError;
use bytes::{Bytes, BytesMut};
use itoa::Buffer;

/// Maximum key length (memcached spec)
pub const MAX_KEY_LENGTH: usize = 250;

/// Check if a key is valid
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    // Keys cannot contain control characters or whitespace
    key.iter().all(|&b| b > 32 && b < 127)
}

/// Validate a key before it goes on the wire
pub fn check_key(key: &[u8]) -> Result<(), ProtocolError> {
    if is_valid_key(key) {
        Ok(())
    } else if key.len() > MAX_KEY_LENGTH {
        Err(ProtocolError::KeyTooLong)
    } else {
        Err(ProtocolError::InvalidKey(
            String::from_utf8_lossy(key).to_string(),
        ))
    }
}

/// Request builder for memcached ASCII protocol
pub struct RequestWriter {
    buf: BytesMut,
}

impl RequestWriter {
    /// Create a new request writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the internal buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Format: get <key>\r\n
    pub fn get(&mut self, key: &[u8]) {
        self.buf.extend_from_slice(b"get ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Format: set <key> <flags> <exptime> <bytes>\r\n<data>\r\n
    pub fn set(&mut self, key: &[u8], flags: u32, exptime: u32, data: &[u8]) {
        let mut itoa_buf = Buffer::new();
        self.buf.reserve(key.len() + data.len() + 40);
        self.buf.extend_from_slice(b"set ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(flags).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(exptime).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(data.len()).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Format: delete <key>\r\n
    pub fn delete(&mut self, key: &[u8]) {
        self.buf.extend_from_slice(b"delete ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b"\r\n");
    }

    pub fn flush_all(&mut self) {
        self.buf.extend_from_slice(b"flush_all\r\n");
    }
}

impl Default for RequestWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// A single parsed server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// VALUE <key> <flags> <bytes>\r\n<data>\r\n (flags are always written as 0)
    Value { key: Vec<u8>, data: Bytes },
    End,
    Stored,
    NotStored,
    Exists,
    Deleted,
    NotFound,
    Ok,
    /// ERROR, CLIENT_ERROR <msg> or SERVER_ERROR <msg>
    Error(String),
}

/// Result of parsing
#[derive(Debug)]
pub enum ParseResult {
    /// Response fully parsed, with bytes consumed
    Complete(Response, usize),
    /// Need more data to complete parsing
    NeedMoreData,
    /// Parse error
    Error(ProtocolError),
}

/// Parse one response from the front of a buffer
///
/// VALUE blocks longer than `max_value_len` are rejected before their data
/// is buffered.
pub fn parse_response(buf: &[u8], max_value_len: usize) -> ParseResult {
    let Some(line_end) = find_crlf(buf) else {
        return ParseResult::NeedMoreData;
    };
    let line = &buf[..line_end];
    let consumed = line_end + 2;

    let simple = match line {
        b"END" => Some(Response::End),
        b"STORED" => Some(Response::Stored),
        b"NOT_STORED" => Some(Response::NotStored),
        b"EXISTS" => Some(Response::Exists),
        b"DELETED" => Some(Response::Deleted),
        b"NOT_FOUND" => Some(Response::NotFound),
        b"OK" => Some(Response::Ok),
        b"ERROR" => Some(Response::Error("ERROR".to_string())),
        _ => None,
    };
    if let Some(response) = simple {
        return ParseResult::Complete(response, consumed);
    }

    if line.starts_with(b"CLIENT_ERROR") || line.starts_with(b"SERVER_ERROR") {
        return ParseResult::Complete(
            Response::Error(String::from_utf8_lossy(line).to_string()),
            consumed,
        );
    }

    if let Some(header) = line.strip_prefix(b"VALUE ") {
        return parse_value(header, buf, line_end, max_value_len);
    }

    ParseResult::Error(ProtocolError::InvalidResponse(
        String::from_utf8_lossy(line).to_string(),
    ))
}

/// Parse the VALUE header and its data block
fn parse_value(header: &[u8], buf: &[u8], line_end: usize, max_value_len: usize) -> ParseResult {
    // <key> <flags> <bytes> [<cas unique>]
    let mut parts = header.split(|&b| b == b' ').filter(|p| !p.is_empty());

    let Some(key) = parts.next() else {
        return ParseResult::Error(ProtocolError::InvalidValueHeader);
    };
    if parts.next().and_then(parse_u32).is_none() {
        return ParseResult::Error(ProtocolError::InvalidValueHeader);
    }
    let Some(bytes) = parts.next().and_then(parse_usize) else {
        return ParseResult::Error(ProtocolError::InvalidValueHeader);
    };
    if bytes > max_value_len {
        return ParseResult::Error(ProtocolError::ValueTooLarge(bytes));
    }

    let data_start = line_end + 2;
    let Some(total_needed) = data_start
        .checked_add(bytes)
        .and_then(|end| end.checked_add(2))
    else {
        return ParseResult::Error(ProtocolError::InvalidValueHeader);
    };
    let data_end = total_needed - 2;

    if buf.len() < total_needed {
        return ParseResult::NeedMoreData;
    }

    // Verify trailing \r\n
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return ParseResult::Error(ProtocolError::UnexpectedData);
    }

    ParseResult::Complete(
        Response::Value {
            key: key.to_vec(),
            data: Bytes::copy_from_slice(&buf[data_start..data_end]),
        },
        total_needed,
    )
}

/// Find \r\n in buffer using SIMD-accelerated search
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n")
}

fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn parse_usize(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
