//! Session history and line-ending normalization.
//!
//! The buffer is append-only and unbounded for the life of a session. A
//! long-lived, high-volume source grows it without limit.

use bytes::Bytes;

/// Largest chunk read from a TCP source per ingest cycle
pub const CHUNK_SIZE: usize = 256;

/// Canonicalizes `\n` and `\r\n` to `\r\n`.
///
/// Stateful so a `\r` at the end of one chunk pairs with a `\n` at the start
/// of the next instead of producing `\r\r\n`.
#[derive(Debug, Default)]
pub struct LineNormalizer {
    after_cr: bool,
}

impl LineNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 8 + 1);
        for &byte in chunk {
            if byte == b'\n' && !self.after_cr {
                out.push(b'\r');
            }
            out.push(byte);
            self.after_cr = byte == b'\r';
        }
        Bytes::from(out)
    }
}

/// Everything a TCP source has emitted since it connected, normalized.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    bytes: Vec<u8>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Copy of the full history, used as the replay message.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}
