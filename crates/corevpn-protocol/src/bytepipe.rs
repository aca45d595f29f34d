//! Byte Pipe
//!
//! Growable contiguous buffer with independent read and write cursors.
//! Used as the staging buffer for session framing and TLS record
//! reassembly: bytes are written as they arrive off the wire and consumed
//! once a complete unit has been parsed out.

use crate::{ProtocolError, Result};

/// A growable byte buffer with read/write/peek/consume semantics.
///
/// Invariant: `read <= write <= buf.len()`. The pipe never shrinks; it
/// grows by roughly 1.5x when a write would otherwise overflow, and
/// compacts the unread region to the front first if that alone frees
/// enough room.
pub struct BytePipe {
    buf: Vec<u8>,
    read: usize,
    write: usize,
}

impl BytePipe {
    /// Create a pipe with a small default capacity.
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    /// Create a pipe with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            read: 0,
            write: 0,
        }
    }

    /// Bytes available to read.
    pub fn available(&self) -> usize {
        self.write - self.read
    }

    /// Borrow the unread region without consuming it.
    pub fn available_view(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// Append bytes, growing capacity as needed. Always accepts the full input.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.ensure_capacity(bytes.len());
        let start = self.write;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
        bytes.len()
    }

    /// Copy up to `dst.len()` unread bytes, starting `skip` bytes past the
    /// read cursor, without consuming them.
    pub fn peek(&self, dst: &mut [u8], skip: usize) -> usize {
        let avail = self.available().saturating_sub(skip);
        let n = dst.len().min(avail);
        let start = self.read + skip;
        dst[..n].copy_from_slice(&self.buf[start..start + n]);
        n
    }

    /// Advance the read cursor by `n` bytes. Fails if `n` exceeds `available()`.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        if n > self.available() {
            return Err(ProtocolError::InvalidPacket(
                "consume beyond available bytes".into(),
            ));
        }
        self.read += n;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
        Ok(())
    }

    /// Read (peek then consume) up to `dst.len()` bytes.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> usize {
        let n = self.peek(dst, 0);
        self.consume(n).expect("n <= available by construction");
        n
    }

    /// Reset to empty without reallocating.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    fn ensure_capacity(&mut self, additional: usize) {
        let needed = self.write + additional;
        if needed <= self.buf.len() {
            return;
        }
        if self.read > self.buf.len() / 4 {
            self.buf.copy_within(self.read..self.write, 0);
            self.write -= self.read;
            self.read = 0;
            if self.write + additional <= self.buf.len() {
                return;
            }
        }
        let mut new_cap = self.buf.len().max(1);
        while new_cap < self.write + additional {
            new_cap += new_cap / 2 + 1;
        }
        self.buf.resize(new_cap, 0);
    }
}

impl Default for BytePipe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_write_read() {
        let mut pipe = BytePipe::with_capacity(4);
        pipe.write_bytes(b"hello");
        pipe.write_bytes(b" world");

        let mut out = vec![0u8; 11];
        let n = pipe.read_bytes(&mut out);
        assert_eq!(n, 11);
        assert_eq!(&out, b"hello world");
        assert_eq!(pipe.available(), 0);
    }

    #[test]
    fn partial_read_keeps_remainder() {
        let mut pipe = BytePipe::new();
        pipe.write_bytes(b"abcdef");

        let mut out = [0u8; 3];
        pipe.read_bytes(&mut out);
        assert_eq!(&out, b"abc");
        assert_eq!(pipe.available(), 3);
        assert_eq!(pipe.available_view(), b"def");
    }

    #[test]
    fn consume_beyond_available_fails() {
        let mut pipe = BytePipe::new();
        pipe.write_bytes(b"ab");
        assert!(pipe.consume(5).is_err());
    }

    #[test]
    fn grows_and_compacts() {
        let mut pipe = BytePipe::with_capacity(8);
        pipe.write_bytes(&[1u8; 6]);
        pipe.consume(6).unwrap();
        // read == write resets both cursors to zero, freeing reuse.
        assert_eq!(pipe.available(), 0);

        pipe.write_bytes(&[2u8; 20]);
        assert_eq!(pipe.available(), 20);
        assert!(pipe.buf.len() >= 20);
    }
}
