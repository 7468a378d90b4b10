//! Client events and state types.

use bytes::Bytes;
use mqrelay_core::packet::QoS;

/// Events produced by the protocol engine for the application to consume.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The broker accepted the connection.
    Connected {
        /// Whether a previous session was restored.
        session_present: bool,
    },
    /// The connection ended.
    Disconnected {
        /// Reason, if known.
        reason: Option<String>,
    },
    /// Received a publish message.
    Message {
        topic: String,
        payload: Bytes,
        qos: QoS,
        /// Set on retained replays and retain-as-published forwards.
        retain: bool,
        packet_id: Option<u16>,
    },
    /// Subscribe acknowledgment; one code per requested filter
    /// (0x00-0x02 = granted QoS, 0x80 and above = failure).
    SubAck { packet_id: u16, reason_codes: Vec<u8> },
    /// Unsubscribe acknowledgment (codes are empty pre-v5).
    UnsubAck { packet_id: u16, reason_codes: Vec<u8> },
    /// QoS 1 publish acknowledged.
    PubAck { packet_id: u16, reason_code: u8 },
    /// QoS 2 publish completed.
    PubComp { packet_id: u16 },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Disconnected,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    Connected,
}
