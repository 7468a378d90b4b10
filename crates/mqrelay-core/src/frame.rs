//! Stream reassembly for packets split or coalesced by the transport.

use crate::error::Result;
use crate::packet::{decode_packet, Packet};

/// Accumulates raw transport bytes and yields complete packets.
///
/// Bytes arrive in arbitrary chunks; [`FrameBuffer::next_packet`] decodes
/// from the front of the buffer and drains exactly the consumed bytes, so
/// the remainder of a coalesced read seeds the next parse. Call it in a
/// loop after each [`FrameBuffer::extend`] until it returns `Ok(None)`.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Decode the next complete packet, if the buffer holds one.
    ///
    /// On `Err` the buffer is left untouched; the connection is beyond
    /// recovery at that point and should be torn down.
    pub fn next_packet(
        &mut self,
        protocol_version: u8,
        max_packet_size: u32,
    ) -> Result<Option<Packet>> {
        match decode_packet(&self.buf, protocol_version, max_packet_size)? {
            Some((packet, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_packet, Ack, Publish, QoS};
    use bytes::Bytes;

    fn sample_publish(id: u16) -> Packet {
        Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "t/1".into(),
            packet_id: Some(id),
            properties: None,
            payload: Bytes::from_static(b"x"),
        })
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut wire = Vec::new();
        encode_packet(&sample_publish(3), 4, &mut wire).unwrap();

        let mut frame = FrameBuffer::new();
        for &byte in &wire[..wire.len() - 1] {
            frame.extend(&[byte]);
            assert!(frame.next_packet(4, 0).unwrap().is_none());
        }
        frame.extend(&wire[wire.len() - 1..]);
        assert_eq!(frame.next_packet(4, 0).unwrap(), Some(sample_publish(3)));
        assert!(frame.is_empty());
    }

    #[test]
    fn test_pipelined_packets_in_one_chunk() {
        let mut wire = Vec::new();
        encode_packet(&sample_publish(1), 4, &mut wire).unwrap();
        encode_packet(&Packet::Puback(Ack::new(9)), 4, &mut wire).unwrap();
        encode_packet(&Packet::Pingreq, 4, &mut wire).unwrap();

        let mut frame = FrameBuffer::new();
        frame.extend(&wire);
        assert_eq!(frame.next_packet(4, 0).unwrap(), Some(sample_publish(1)));
        assert_eq!(
            frame.next_packet(4, 0).unwrap(),
            Some(Packet::Puback(Ack::new(9)))
        );
        assert_eq!(frame.next_packet(4, 0).unwrap(), Some(Packet::Pingreq));
        assert_eq!(frame.next_packet(4, 0).unwrap(), None);
    }

    #[test]
    fn test_partial_second_packet_waits() {
        let mut first = Vec::new();
        encode_packet(&sample_publish(1), 4, &mut first).unwrap();
        let mut second = Vec::new();
        encode_packet(&sample_publish(2), 4, &mut second).unwrap();

        let mut frame = FrameBuffer::new();
        frame.extend(&first);
        frame.extend(&second[..3]);

        assert_eq!(frame.next_packet(4, 0).unwrap(), Some(sample_publish(1)));
        assert_eq!(frame.next_packet(4, 0).unwrap(), None);

        frame.extend(&second[3..]);
        assert_eq!(frame.next_packet(4, 0).unwrap(), Some(sample_publish(2)));
    }

    #[test]
    fn test_malformed_input_errors() {
        let mut frame = FrameBuffer::new();
        // PINGREQ with bad flags.
        frame.extend(&[0xC4, 0x00]);
        assert!(frame.next_packet(4, 0).is_err());
    }
}
