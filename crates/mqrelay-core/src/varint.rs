//! Variable Byte Integer encoding/decoding for MQTT.
//!
//! MQTT length fields use a variable-length encoding: 7 bits of value per
//! byte, with the high bit marking a continuation. At most 4 bytes are
//! allowed, giving a ceiling of 268,435,455:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use crate::error::{ProtocolError, Result};

/// Largest value representable in 4 encoded bytes.
pub const MAX: u32 = 268_435_455;

/// Decode a variable byte integer from a buffer.
///
/// Returns `Ok(Some((value, bytes_consumed)))` if successful, `Ok(None)` if
/// the buffer ends mid-encoding (caller should wait for more data), or `Err`
/// if a fifth byte carries a continuation bit.
///
/// # Example
/// ```
/// use mqrelay_core::varint::decode;
/// let buf = [0x80, 0x01]; // Encodes 128
/// let (value, consumed) = decode(&buf).unwrap().unwrap();
/// assert_eq!(value, 128);
/// assert_eq!(consumed, 2);
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut multiplier = 1u32;
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(ProtocolError::InvalidRemainingLength.into());
        }

        value += (byte & 0x7F) as u32 * multiplier;

        if (byte & 0x80) == 0 {
            return Ok(Some((value, i + 1)));
        }

        multiplier *= 128;
    }

    // Need more bytes
    Ok(None)
}

/// Encode a value as a variable byte integer, appending to a Vec.
///
/// Returns the number of bytes written, or `Err` if the value exceeds
/// [`MAX`].
///
/// # Example
/// ```
/// use mqrelay_core::varint::encode;
/// let mut buf = Vec::new();
/// let written = encode(300, &mut buf).unwrap();
/// assert_eq!(written, 2);
/// assert_eq!(&buf, &[0xAC, 0x02]);
/// ```
pub fn encode(mut value: u32, buf: &mut Vec<u8>) -> Result<usize> {
    if value > MAX {
        return Err(ProtocolError::InvalidRemainingLength.into());
    }

    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Calculate the number of bytes needed to encode a value.
///
/// # Example
/// ```
/// use mqrelay_core::varint::encoded_len;
/// assert_eq!(encoded_len(127), 1);
/// assert_eq!(encoded_len(128), 2);
/// ```
pub fn encoded_len(mut value: u32) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_boundaries() {
        assert_eq!(decode(&[0]).unwrap(), Some((0, 1)));
        assert_eq!(decode(&[0x7F]).unwrap(), Some((127, 1)));
        assert_eq!(decode(&[0x80, 0x01]).unwrap(), Some((128, 2)));
        assert_eq!(decode(&[0xFF, 0x7F]).unwrap(), Some((16383, 2)));
        assert_eq!(decode(&[0x80, 0x80, 0x01]).unwrap(), Some((16384, 3)));
        assert_eq!(decode(&[0xFF, 0xFF, 0x7F]).unwrap(), Some((2097151, 3)));
        assert_eq!(
            decode(&[0x80, 0x80, 0x80, 0x01]).unwrap(),
            Some((2097152, 4))
        );
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            Some((268435455, 4))
        );
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&[]).unwrap(), None);
        assert_eq!(decode(&[0x80]).unwrap(), None);
        assert_eq!(decode(&[0x80, 0x80]).unwrap(), None);
        assert_eq!(decode(&[0x80, 0x80, 0x80]).unwrap(), None);
    }

    #[test]
    fn test_decode_fifth_continuation_byte() {
        assert!(decode(&[0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
        assert!(decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]).is_err());
    }

    #[test]
    fn test_encode_rejects_overflow() {
        let mut buf = Vec::new();
        assert!(encode(MAX, &mut buf).is_ok());
        buf.clear();
        assert!(encode(MAX + 1, &mut buf).is_err());
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(127), 1);
        assert_eq!(encoded_len(128), 2);
        assert_eq!(encoded_len(16383), 2);
        assert_eq!(encoded_len(16384), 3);
        assert_eq!(encoded_len(2097151), 3);
        assert_eq!(encoded_len(2097152), 4);
        assert_eq!(encoded_len(268435455), 4);
    }

    #[test]
    fn test_roundtrip() {
        for value in [0, 1, 127, 128, 16383, 16384, 2097151, 2097152, MAX] {
            let mut buf = Vec::new();
            let written = encode(value, &mut buf).unwrap();
            assert_eq!(written, encoded_len(value));
            let (decoded, consumed) = decode(&buf).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }
}
