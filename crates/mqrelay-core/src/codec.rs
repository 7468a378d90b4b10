//! Byte-level reader and writer for the MQTT wire format.
//!
//! [`Reader`] walks a borrowed buffer and reports truncation as
//! `IncompletePacket`, so packet decoders never index out of bounds.
//! [`Writer`] appends to an owned buffer; nested length-prefixed sections
//! (v5 property blocks, will property blocks) go through
//! [`Writer::write_block`], which measures the section before prefixing it.

use crate::error::{ProtocolError, Result};
use crate::varint;

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn require(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(ProtocolError::IncompletePacket {
                needed,
                have: self.remaining(),
            }
            .into());
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = u32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(len)?;
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a length-prefixed UTF-8 string. Embedded NUL is rejected per
    /// [MQTT-1.5.4-2].
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        if bytes.contains(&0) {
            return Err(ProtocolError::InvalidUtf8.into());
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// Read length-prefixed binary data.
    pub fn read_binary(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    /// Read a variable byte integer. Truncation is an error here: the caller
    /// already holds the full packet body.
    pub fn read_varint(&mut self) -> Result<u32> {
        match varint::decode(&self.buf[self.pos..])? {
            Some((value, consumed)) => {
                self.pos += consumed;
                Ok(value)
            }
            None => Err(ProtocolError::IncompletePacket {
                needed: self.remaining() + 1,
                have: self.remaining(),
            }
            .into()),
        }
    }

    /// Everything not yet consumed.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string. The prefix is a u16, so
    /// anything past 65,535 bytes cannot be represented and is rejected
    /// rather than truncated.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len()).map_err(|_| {
            ProtocolError::MalformedPacket(format!("string of {} bytes exceeds u16 length", s.len()))
        })?;
        self.write_u16(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Write length-prefixed binary data, with the same u16 bound as
    /// [`Writer::write_string`].
    pub fn write_binary(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| {
            ProtocolError::MalformedPacket(format!(
                "binary field of {} bytes exceeds u16 length",
                bytes.len()
            ))
        })?;
        self.write_u16(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_varint(&mut self, v: u32) -> Result<()> {
        varint::encode(v, &mut self.buf)?;
        Ok(())
    }

    /// Write a varint-length-prefixed section filled in by `f`.
    pub fn write_block(&mut self, f: impl FnOnce(&mut Writer) -> Result<()>) -> Result<()> {
        let mut inner = Writer::new();
        f(&mut inner)?;
        self.write_varint(inner.len() as u32)?;
        self.buf.extend_from_slice(&inner.buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_truncation() {
        let mut r = Reader::new(&[0x00]);
        assert!(r.read_u16().is_err());

        let mut r = Reader::new(&[0x00, 0x05, b'a']);
        assert!(r.read_string().is_err());
    }

    #[test]
    fn test_read_string_rejects_nul() {
        let mut r = Reader::new(&[0x00, 0x03, b'a', 0x00, b'b']);
        assert!(r.read_string().is_err());
    }

    #[test]
    fn test_string_roundtrip() {
        let mut w = Writer::new();
        w.write_string("hello/world").unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "hello/world");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_write_string_rejects_oversized() {
        let big = "x".repeat(u16::MAX as usize + 5);
        let mut w = Writer::new();
        assert!(w.write_string(&big).is_err());
        assert!(w.write_binary(big.as_bytes()).is_err());
        // A failed write leaves nothing behind a bogus length prefix.
        assert!(w.is_empty());

        let mut w = Writer::new();
        assert!(w.write_binary(&vec![0u8; u16::MAX as usize]).is_ok());
    }

    #[test]
    fn test_write_block_prefixes_length() {
        let mut w = Writer::new();
        w.write_block(|b| {
            b.write_u8(0x11);
            b.write_u32(60);
            Ok(())
        })
        .unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes[0], 5);
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn test_empty_block() {
        let mut w = Writer::new();
        w.write_block(|_| Ok(())).unwrap();
        assert_eq!(w.into_bytes(), vec![0]);
    }
}
