//! Error types for mqrelay.

use std::io;

use thiserror::Error;

/// Main error type for mqrelay.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// MQTT protocol errors.
///
/// Every variant carries enough context to log the failure and maps onto a
/// v5 DISCONNECT reason code via [`ProtocolError::reason_code`]. Pre-v5
/// peers get a plain connection close, so the mapping only matters on 5.0.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid fixed header flags {flags:#04x} for {packet_type}")]
    InvalidFixedHeaderFlags { packet_type: &'static str, flags: u8 },

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("Packet of {size} bytes exceeds maximum of {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid protocol name: '{0}'")]
    InvalidProtocolName(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Reserved QoS value 3")]
    ReservedQos,

    #[error("QoS {0} not supported")]
    QosNotSupported(u8),

    #[error("Retained messages not supported")]
    RetainNotSupported,

    #[error("Invalid topic name: '{0}'")]
    TopicNameInvalid(String),

    #[error("Invalid topic filter: '{0}'")]
    TopicFilterInvalid(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("First packet must be CONNECT")]
    FirstPacketNotConnect,
}

impl ProtocolError {
    /// The v5 reason code a server sends in DISCONNECT for this error.
    pub fn reason_code(&self) -> u8 {
        use crate::packet::reason;

        match self {
            ProtocolError::InvalidPacketType(_)
            | ProtocolError::InvalidFixedHeaderFlags { .. }
            | ProtocolError::InvalidRemainingLength
            | ProtocolError::IncompletePacket { .. }
            | ProtocolError::InvalidConnectFlags(_)
            | ProtocolError::InvalidUtf8
            | ProtocolError::ReservedQos
            | ProtocolError::MalformedPacket(_) => reason::MALFORMED_PACKET,
            ProtocolError::PacketTooLarge { .. } => reason::PACKET_TOO_LARGE,
            ProtocolError::InvalidProtocolName(_)
            | ProtocolError::UnsupportedProtocolVersion(_) => {
                reason::UNSUPPORTED_PROTOCOL_VERSION
            }
            ProtocolError::QosNotSupported(_) => reason::QOS_NOT_SUPPORTED,
            ProtocolError::RetainNotSupported => reason::RETAIN_NOT_SUPPORTED,
            ProtocolError::TopicNameInvalid(_) => reason::TOPIC_NAME_INVALID,
            ProtocolError::TopicFilterInvalid(_) => reason::TOPIC_FILTER_INVALID,
            ProtocolError::ProtocolViolation(_) | ProtocolError::FirstPacketNotConnect => {
                reason::PROTOCOL_ERROR
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
