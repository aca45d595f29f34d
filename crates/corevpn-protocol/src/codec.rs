//! Packet Reader / Writer
//!
//! Big-endian primitive codec over a byte buffer: fixed-width integers
//! with a configurable partial width (e.g. a 2-byte length prefix read as
//! a `u32`), and null-terminated strings.

use crate::{ProtocolError, Result};

/// Reads big-endian primitives from a byte slice, tracking a cursor.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Wrap a byte slice for reading.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left unread.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::PacketTooShort {
                expected: n,
                got: self.remaining(),
            });
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read `n` raw bytes.
    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read a `u16` from `bytes_amount` bytes (`bytes_amount ∈ [0, 2]`).
    pub fn read_u16(&mut self, bytes_amount: usize) -> Result<u16> {
        self.read_uint(bytes_amount, 2).map(|v| v as u16)
    }

    /// Read a `u32` from `bytes_amount` bytes (`bytes_amount ∈ [0, 4]`).
    pub fn read_u32(&mut self, bytes_amount: usize) -> Result<u32> {
        self.read_uint(bytes_amount, 4).map(|v| v as u32)
    }

    /// Read a `u64` from `bytes_amount` bytes (`bytes_amount ∈ [0, 8]`).
    pub fn read_u64(&mut self, bytes_amount: usize) -> Result<u64> {
        self.read_uint(bytes_amount, 8)
    }

    fn read_uint(&mut self, bytes_amount: usize, width: usize) -> Result<u64> {
        if bytes_amount > width {
            return Err(ProtocolError::InvalidPacket(format!(
                "width {bytes_amount} exceeds type size {width}"
            )));
        }
        let raw = self.take(bytes_amount)?;
        let mut v: u64 = 0;
        for &b in raw {
            v = (v << 8) | b as u64;
        }
        Ok(v)
    }

    /// Read a UTF-8 string terminated by a single `0x00` byte. An
    /// immediately-empty remainder (no terminator, nothing left) yields an
    /// empty string, matching the zero-byte empty-string encoding.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return Ok(String::new());
        }
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                let s = std::str::from_utf8(&rest[..idx])
                    .map_err(|_| ProtocolError::InvalidPacket("invalid UTF-8 string".into()))?
                    .to_string();
                self.pos += idx + 1;
                Ok(s)
            }
            None => Err(ProtocolError::PacketTooShort {
                expected: rest.len() + 1,
                got: rest.len(),
            }),
        }
    }
}

/// Writes big-endian primitives into a growable buffer.
#[derive(Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write the low `bytes_amount` bytes of `v`, big-endian.
    pub fn write_u16(&mut self, v: u16, bytes_amount: usize) -> Result<()> {
        self.write_uint(v as u64, bytes_amount, 2)
    }

    /// Write the low `bytes_amount` bytes of `v`, big-endian.
    pub fn write_u32(&mut self, v: u32, bytes_amount: usize) -> Result<()> {
        self.write_uint(v as u64, bytes_amount, 4)
    }

    /// Write the low `bytes_amount` bytes of `v`, big-endian.
    pub fn write_u64(&mut self, v: u64, bytes_amount: usize) -> Result<()> {
        self.write_uint(v, bytes_amount, 8)
    }

    fn write_uint(&mut self, v: u64, bytes_amount: usize, width: usize) -> Result<()> {
        if bytes_amount > width {
            return Err(ProtocolError::InvalidPacket(format!(
                "width {bytes_amount} exceeds type size {width}"
            )));
        }
        let full = v.to_be_bytes();
        self.buf.extend_from_slice(&full[8 - bytes_amount..]);
        Ok(())
    }

    /// Write a UTF-8 string with a trailing `0x00` terminator. An empty
    /// string writes zero bytes.
    pub fn write_cstring(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_roundtrip_full_width() {
        let mut w = PacketWriter::new();
        w.write_u32(0xDEAD_BEEF, 4).unwrap();
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_u32(4).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn integer_partial_width_truncates() {
        let mut w = PacketWriter::new();
        w.write_u32(0x0001_0203, 2).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes, [0x02, 0x03]);

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_u32(2).unwrap(), 0x0203);
    }

    #[test]
    fn width_exceeding_type_size_errors() {
        let mut w = PacketWriter::new();
        assert!(w.write_u16(1, 4).is_err());

        let buf = [0u8; 4];
        let mut r = PacketReader::new(&buf);
        assert!(r.read_u16(4).is_err());
    }

    #[test]
    fn cstring_roundtrip() {
        let mut w = PacketWriter::new();
        w.write_cstring("hello");
        let bytes = w.into_bytes();
        assert_eq!(bytes, b"hello\0");

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_cstring().unwrap(), "hello");
    }

    #[test]
    fn empty_string_is_zero_bytes() {
        let mut w = PacketWriter::new();
        w.write_cstring("");
        assert!(w.into_bytes().is_empty());
    }

    #[test]
    fn reader_fails_past_end_of_stream() {
        let buf = [0x01];
        let mut r = PacketReader::new(&buf);
        assert!(r.read_u32(4).is_err());
    }
}
