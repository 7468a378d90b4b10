//! MQTT packet model and wire codec.
//!
//! One packet model covers protocol levels 3 (MQTT 3.1, name "MQIsdp"),
//! 4 (MQTT 3.1.1) and 5 (MQTT 5.0). The negotiated level is a parameter of
//! [`decode_packet`] and [`encode_packet`] rather than a field on every
//! packet, so a broker can re-encode one message for peers on different
//! levels.

use bytes::Bytes;

use crate::codec::{Reader, Writer};
use crate::error::{ProtocolError, Result};
use crate::properties::{
    AckProperties, AuthProperties, ConnackProperties, ConnectProperties, DisconnectProperties,
    PublishProperties, SubscribeProperties, UnsubscribeProperties, WillProperties,
};
use crate::varint;

/// Reason codes (MQTT 5.0). Values below 0x80 are success variants.
pub mod reason {
    pub const SUCCESS: u8 = 0x00;
    pub const NORMAL_DISCONNECTION: u8 = 0x00;
    pub const GRANTED_QOS_0: u8 = 0x00;
    pub const GRANTED_QOS_1: u8 = 0x01;
    pub const GRANTED_QOS_2: u8 = 0x02;
    pub const DISCONNECT_WITH_WILL: u8 = 0x04;
    pub const NO_MATCHING_SUBSCRIBERS: u8 = 0x10;
    pub const NO_SUBSCRIPTION_EXISTED: u8 = 0x11;
    pub const CONTINUE_AUTHENTICATION: u8 = 0x18;
    pub const REAUTHENTICATE: u8 = 0x19;
    pub const UNSPECIFIED_ERROR: u8 = 0x80;
    /// Pre-v5 SUBACK failure marker shares this value.
    pub const FAILURE: u8 = 0x80;
    pub const MALFORMED_PACKET: u8 = 0x81;
    pub const PROTOCOL_ERROR: u8 = 0x82;
    pub const IMPLEMENTATION_SPECIFIC_ERROR: u8 = 0x83;
    pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 0x84;
    pub const CLIENT_IDENTIFIER_NOT_VALID: u8 = 0x85;
    pub const BAD_USERNAME_OR_PASSWORD: u8 = 0x86;
    pub const NOT_AUTHORIZED: u8 = 0x87;
    pub const SERVER_UNAVAILABLE: u8 = 0x88;
    pub const SERVER_BUSY: u8 = 0x89;
    pub const BANNED: u8 = 0x8A;
    pub const SERVER_SHUTTING_DOWN: u8 = 0x8B;
    pub const KEEP_ALIVE_TIMEOUT: u8 = 0x8D;
    pub const SESSION_TAKEN_OVER: u8 = 0x8E;
    pub const TOPIC_FILTER_INVALID: u8 = 0x8F;
    pub const TOPIC_NAME_INVALID: u8 = 0x90;
    pub const PACKET_IDENTIFIER_IN_USE: u8 = 0x91;
    pub const PACKET_IDENTIFIER_NOT_FOUND: u8 = 0x92;
    pub const TOPIC_ALIAS_INVALID: u8 = 0x94;
    pub const PACKET_TOO_LARGE: u8 = 0x95;
    pub const QUOTA_EXCEEDED: u8 = 0x97;
    pub const PAYLOAD_FORMAT_INVALID: u8 = 0x99;
    pub const RETAIN_NOT_SUPPORTED: u8 = 0x9A;
    pub const QOS_NOT_SUPPORTED: u8 = 0x9B;
    pub const SHARED_SUBSCRIPTIONS_NOT_SUPPORTED: u8 = 0x9E;
    pub const SUBSCRIPTION_IDENTIFIERS_NOT_SUPPORTED: u8 = 0xA1;
    pub const WILDCARD_SUBSCRIPTIONS_NOT_SUPPORTED: u8 = 0xA2;
}

/// MQTT control packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Auth => "AUTH",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            15 => Ok(PacketType::Auth),
            other => Err(ProtocolError::InvalidPacketType(other).into()),
        }
    }
}

/// Quality of Service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = crate::error::Error;

    /// The reserved bit pattern 3 and out-of-range values map to distinct
    /// errors: 3 is a malformed packet, anything larger (e.g. the 0x80
    /// failure sentinel leaking into a QoS field) is "QoS not supported".
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            3 => Err(ProtocolError::ReservedQos.into()),
            other => Err(ProtocolError::QosNotSupported(other).into()),
        }
    }
}

/// Retained-message replay behavior requested on SUBSCRIBE (v5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RetainHandling {
    /// Replay retained messages on every subscribe.
    #[default]
    SendAlways = 0,
    /// Replay only if the subscription did not already exist.
    SendIfNew = 1,
    /// Never replay retained messages.
    Never = 2,
}

impl RetainHandling {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(RetainHandling::SendAlways),
            1 => Ok(RetainHandling::SendIfNew),
            2 => Ok(RetainHandling::Never),
            _ => Err(ProtocolError::MalformedPacket("retain handling value 3".into()).into()),
        }
    }
}

/// Per-filter subscription options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    /// Do not deliver messages published by this same client (v5).
    pub no_local: bool,
    /// Forward the publisher's RETAIN flag instead of clearing it (v5).
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    pub fn with_qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    fn from_byte(byte: u8, is_v5: bool) -> Result<Self> {
        if is_v5 && byte & 0xC0 != 0 {
            return Err(
                ProtocolError::MalformedPacket("reserved subscription option bits set".into())
                    .into(),
            );
        }
        let qos = QoS::try_from(byte & 0x03)?;
        if !is_v5 {
            return Ok(Self::with_qos(qos));
        }
        Ok(Self {
            qos,
            no_local: byte & 0x04 != 0,
            retain_as_published: byte & 0x08 != 0,
            retain_handling: RetainHandling::from_bits((byte >> 4) & 0x03)?,
        })
    }

    fn to_byte(self, is_v5: bool) -> u8 {
        let mut byte = self.qos as u8;
        if is_v5 {
            byte |= (self.no_local as u8) << 2;
            byte |= (self.retain_as_published as u8) << 3;
            byte |= (self.retain_handling as u8) << 4;
        }
        byte
    }
}

/// Will message carried in CONNECT.
#[derive(Debug, Clone, PartialEq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub properties: Option<WillProperties>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    /// 3 = MQTT 3.1, 4 = MQTT 3.1.1, 5 = MQTT 5.0.
    pub protocol_version: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub properties: Option<ConnectProperties>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connack {
    pub session_present: bool,
    /// v5 reason code. Pre-v5 encoding maps it onto the 3.x return codes.
    pub reason_code: u8,
    pub properties: Option<ConnackProperties>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff QoS > 0.
    pub packet_id: Option<u16>,
    pub properties: Option<PublishProperties>,
    pub payload: Bytes,
}

/// Shared shape for PUBACK, PUBREC, PUBREL and PUBCOMP.
///
/// On v5 the wire form may omit the reason code (then 0x00) and the
/// property block; pre-v5 both are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub packet_id: u16,
    pub reason_code: u8,
    pub properties: Option<AckProperties>,
}

impl Ack {
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: reason::SUCCESS,
            properties: None,
        }
    }

    pub fn with_reason(packet_id: u16, reason_code: u8) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub properties: Option<SubscribeProperties>,
    pub filters: Vec<(String, SubscriptionOptions)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suback {
    pub packet_id: u16,
    pub properties: Option<AckProperties>,
    /// One granted-QoS or failure code per requested filter, in order.
    pub reason_codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub properties: Option<UnsubscribeProperties>,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unsuback {
    pub packet_id: u16,
    pub properties: Option<AckProperties>,
    /// Empty pre-v5; one code per filter on v5.
    pub reason_codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    pub reason_code: u8,
    pub properties: Option<DisconnectProperties>,
}

impl Disconnect {
    pub fn normal() -> Self {
        Self {
            reason_code: reason::NORMAL_DISCONNECTION,
            properties: None,
        }
    }

    pub fn with_reason(reason_code: u8) -> Self {
        Self {
            reason_code,
            properties: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    pub reason_code: u8,
    pub properties: Option<AuthProperties>,
}

/// A decoded MQTT control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Ack),
    Pubrec(Ack),
    Pubrel(Ack),
    Pubcomp(Ack),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect(Disconnect),
    Auth(Auth),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// The packet identifier, for the types that carry one.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::Puback(a) | Packet::Pubrec(a) | Packet::Pubrel(a) | Packet::Pubcomp(a) => {
                Some(a.packet_id)
            }
            Packet::Subscribe(s) => Some(s.packet_id),
            Packet::Suback(s) => Some(s.packet_id),
            Packet::Unsubscribe(u) => Some(u.packet_id),
            Packet::Unsuback(u) => Some(u.packet_id),
            _ => None,
        }
    }
}

/// Fixed-layout bodies must be consumed exactly; bytes past the last field
/// mean the remaining length lied [MQTT-2.2.3].
fn reject_trailing(r: &Reader<'_>, packet: &'static str) -> Result<()> {
    if r.remaining() > 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "{packet} has {} bytes past the last field",
            r.remaining()
        ))
        .into());
    }
    Ok(())
}

fn nonzero_packet_id(id: u16, packet: &'static str) -> Result<u16> {
    if id == 0 {
        return Err(
            ProtocolError::ProtocolViolation(format!("{packet} packet identifier is zero")).into(),
        );
    }
    Ok(id)
}

/// Decode one packet from the front of `buf`.
///
/// Returns `Ok(Some((packet, consumed)))` on success, `Ok(None)` when the
/// buffer does not yet hold a complete packet, and `Err` for malformed
/// input. `max_packet_size` of 0 disables the size check; oversized packets
/// are rejected as soon as the declared length is known, without waiting for
/// the body.
pub fn decode_packet(
    buf: &[u8],
    protocol_version: u8,
    max_packet_size: u32,
) -> Result<Option<(Packet, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let first = buf[0];
    let type_bits = first >> 4;
    let flags = first & 0x0F;
    let packet_type = PacketType::try_from(type_bits)?;

    let (remaining_len, len_bytes) = match varint::decode(&buf[1..])? {
        Some(v) => v,
        None => return Ok(None),
    };
    let total_len = 1 + len_bytes + remaining_len as usize;

    if max_packet_size > 0 && total_len > max_packet_size as usize {
        return Err(ProtocolError::PacketTooLarge {
            size: total_len,
            max: max_packet_size as usize,
        }
        .into());
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    // Fixed header flag rules: SUBSCRIBE, UNSUBSCRIBE and PUBREL require
    // 0x02; PUBLISH uses the flags for dup/qos/retain; everything else
    // (PUBREC included) reserves them as 0.
    match packet_type {
        PacketType::Publish => {}
        PacketType::Subscribe | PacketType::Unsubscribe | PacketType::Pubrel => {
            if flags != 0x02 {
                return Err(ProtocolError::InvalidFixedHeaderFlags {
                    packet_type: packet_type.name(),
                    flags,
                }
                .into());
            }
        }
        _ => {
            if flags != 0 {
                return Err(ProtocolError::InvalidFixedHeaderFlags {
                    packet_type: packet_type.name(),
                    flags,
                }
                .into());
            }
        }
    }

    let body = &buf[1 + len_bytes..total_len];
    let is_v5 = protocol_version == 5;

    let packet = match packet_type {
        PacketType::Connect => decode_connect(body)?,
        PacketType::Connack => decode_connack(body, is_v5)?,
        PacketType::Publish => decode_publish(flags, body, is_v5)?,
        PacketType::Puback => Packet::Puback(decode_ack(body, is_v5, "PUBACK")?),
        PacketType::Pubrec => Packet::Pubrec(decode_ack(body, is_v5, "PUBREC")?),
        PacketType::Pubrel => Packet::Pubrel(decode_ack(body, is_v5, "PUBREL")?),
        PacketType::Pubcomp => Packet::Pubcomp(decode_ack(body, is_v5, "PUBCOMP")?),
        PacketType::Subscribe => decode_subscribe(body, is_v5)?,
        PacketType::Suback => decode_suback(body, is_v5)?,
        PacketType::Unsubscribe => decode_unsubscribe(body, is_v5)?,
        PacketType::Unsuback => decode_unsuback(body, is_v5)?,
        PacketType::Pingreq => decode_empty(body, Packet::Pingreq, "PINGREQ")?,
        PacketType::Pingresp => decode_empty(body, Packet::Pingresp, "PINGRESP")?,
        PacketType::Disconnect => decode_disconnect(body, is_v5)?,
        PacketType::Auth => decode_auth(body, is_v5)?,
    };

    Ok(Some((packet, total_len)))
}

fn decode_connect(body: &[u8]) -> Result<Packet> {
    let mut r = Reader::new(body);

    let protocol_name = r.read_string()?;
    let protocol_version = r.read_u8()?;
    let is_v5 = protocol_version == 5;

    // Name and level travel as a pair: "MQIsdp" is level 3, "MQTT" is 4 or 5.
    match (protocol_name.as_str(), protocol_version) {
        ("MQIsdp", 3) | ("MQTT", 4) | ("MQTT", 5) => {}
        ("MQIsdp", v) | ("MQTT", v) => {
            return Err(ProtocolError::UnsupportedProtocolVersion(v).into());
        }
        _ => return Err(ProtocolError::InvalidProtocolName(protocol_name).into()),
    }

    let flags = r.read_u8()?;
    let clean_session = flags & 0x02 != 0;
    let will_flag = flags & 0x04 != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
    let will_retain = flags & 0x20 != 0;
    let password_flag = flags & 0x40 != 0;
    let username_flag = flags & 0x80 != 0;

    // Reserved bit must be 0
    if flags & 0x01 != 0 {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }

    // [MQTT-3.1.2-11/13]: Will QoS must be 0 when Will Flag is 0
    if !will_flag && will_qos != QoS::AtMostOnce {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }

    // [MQTT-3.1.2-15]: Will Retain must be 0 when Will Flag is 0
    if !will_flag && will_retain {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }

    // [MQTT-3.1.2-22]: pre-v5, Password requires Username. v5 allows
    // password-only credentials.
    if !is_v5 && !username_flag && password_flag {
        return Err(ProtocolError::InvalidConnectFlags(flags).into());
    }

    let keep_alive = r.read_u16()?;

    let properties = if is_v5 {
        Some(ConnectProperties::read(&mut r)?)
    } else {
        None
    };

    let client_id = r.read_string()?;

    let will = if will_flag {
        let will_properties = if is_v5 {
            Some(WillProperties::read(&mut r)?)
        } else {
            None
        };
        let topic = r.read_string()?;
        let payload = Bytes::copy_from_slice(r.read_binary()?);
        Some(Will {
            topic,
            payload,
            qos: will_qos,
            retain: will_retain,
            properties: will_properties,
        })
    } else {
        None
    };

    let username = if username_flag {
        Some(r.read_string()?)
    } else {
        None
    };
    let password = if password_flag {
        Some(r.read_binary()?.to_vec())
    } else {
        None
    };

    reject_trailing(&r, "CONNECT")?;

    Ok(Packet::Connect(Connect {
        protocol_version,
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
        properties,
    }))
}

fn decode_connack(body: &[u8], is_v5: bool) -> Result<Packet> {
    let mut r = Reader::new(body);

    let ack_flags = r.read_u8()?;
    if ack_flags & 0xFE != 0 {
        return Err(ProtocolError::MalformedPacket("reserved CONNACK flags set".into()).into());
    }
    let session_present = ack_flags & 0x01 != 0;
    let reason_code = r.read_u8()?;

    let properties = if is_v5 {
        Some(ConnackProperties::read(&mut r)?)
    } else {
        None
    };

    reject_trailing(&r, "CONNACK")?;

    Ok(Packet::Connack(Connack {
        session_present,
        reason_code,
        properties,
    }))
}

fn decode_publish(flags: u8, body: &[u8], is_v5: bool) -> Result<Packet> {
    let dup = flags & 0x08 != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = flags & 0x01 != 0;

    // [MQTT-3.3.1-2]: DUP is always 0 for QoS 0 messages
    if dup && qos == QoS::AtMostOnce {
        return Err(ProtocolError::MalformedPacket("DUP set on QoS 0 PUBLISH".into()).into());
    }

    let mut r = Reader::new(body);
    let topic = r.read_string()?;

    let packet_id = if qos != QoS::AtMostOnce {
        Some(nonzero_packet_id(r.read_u16()?, "PUBLISH")?)
    } else {
        None
    };

    let properties = if is_v5 {
        Some(PublishProperties::read(&mut r)?)
    } else {
        None
    };

    let payload = Bytes::copy_from_slice(r.read_rest());

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        properties,
        payload,
    }))
}

/// Decode the PUBACK family. v5 allows shortened bodies: 2 bytes means
/// reason 0x00 and no properties, 3 bytes means no properties.
fn decode_ack(body: &[u8], is_v5: bool, packet: &'static str) -> Result<Ack> {
    let mut r = Reader::new(body);
    let packet_id = nonzero_packet_id(r.read_u16()?, packet)?;

    if !is_v5 || r.remaining() == 0 {
        reject_trailing(&r, packet)?;
        return Ok(Ack::new(packet_id));
    }

    let reason_code = r.read_u8()?;
    let properties = if r.remaining() > 0 {
        Some(AckProperties::read(&mut r)?)
    } else {
        None
    };
    reject_trailing(&r, packet)?;

    Ok(Ack {
        packet_id,
        reason_code,
        properties,
    })
}

fn decode_subscribe(body: &[u8], is_v5: bool) -> Result<Packet> {
    let mut r = Reader::new(body);
    let packet_id = nonzero_packet_id(r.read_u16()?, "SUBSCRIBE")?;

    let properties = if is_v5 {
        Some(SubscribeProperties::read(&mut r)?)
    } else {
        None
    };

    let mut filters = Vec::new();
    while r.remaining() > 0 {
        let filter = r.read_string()?;
        let options = SubscriptionOptions::from_byte(r.read_u8()?, is_v5)?;
        filters.push((filter, options));
    }

    if filters.is_empty() {
        return Err(
            ProtocolError::ProtocolViolation("SUBSCRIBE with no topic filters".into()).into(),
        );
    }

    Ok(Packet::Subscribe(Subscribe {
        packet_id,
        properties,
        filters,
    }))
}

fn decode_suback(body: &[u8], is_v5: bool) -> Result<Packet> {
    let mut r = Reader::new(body);
    let packet_id = nonzero_packet_id(r.read_u16()?, "SUBACK")?;

    let properties = if is_v5 {
        let props = AckProperties::read(&mut r)?;
        (props != AckProperties::default()).then_some(props)
    } else {
        None
    };

    let reason_codes = r.read_rest().to_vec();
    if reason_codes.is_empty() {
        return Err(ProtocolError::MalformedPacket("SUBACK with no reason codes".into()).into());
    }

    Ok(Packet::Suback(Suback {
        packet_id,
        properties,
        reason_codes,
    }))
}

fn decode_unsubscribe(body: &[u8], is_v5: bool) -> Result<Packet> {
    let mut r = Reader::new(body);
    let packet_id = nonzero_packet_id(r.read_u16()?, "UNSUBSCRIBE")?;

    let properties = if is_v5 {
        let props = UnsubscribeProperties::read(&mut r)?;
        (props != UnsubscribeProperties::default()).then_some(props)
    } else {
        None
    };

    let mut filters = Vec::new();
    while r.remaining() > 0 {
        filters.push(r.read_string()?);
    }

    if filters.is_empty() {
        return Err(
            ProtocolError::ProtocolViolation("UNSUBSCRIBE with no topic filters".into()).into(),
        );
    }

    Ok(Packet::Unsubscribe(Unsubscribe {
        packet_id,
        properties,
        filters,
    }))
}

fn decode_unsuback(body: &[u8], is_v5: bool) -> Result<Packet> {
    let mut r = Reader::new(body);
    let packet_id = nonzero_packet_id(r.read_u16()?, "UNSUBACK")?;

    let (properties, reason_codes) = if is_v5 {
        let props = AckProperties::read(&mut r)?;
        let properties = (props != AckProperties::default()).then_some(props);
        (properties, r.read_rest().to_vec())
    } else {
        (None, Vec::new())
    };

    Ok(Packet::Unsuback(Unsuback {
        packet_id,
        properties,
        reason_codes,
    }))
}

fn decode_empty(body: &[u8], packet: Packet, name: &'static str) -> Result<Packet> {
    if !body.is_empty() {
        return Err(
            ProtocolError::MalformedPacket(format!("{name} with nonzero remaining length")).into(),
        );
    }
    Ok(packet)
}

fn decode_disconnect(body: &[u8], is_v5: bool) -> Result<Packet> {
    if !is_v5 {
        return decode_empty(body, Packet::Disconnect(Disconnect::normal()), "DISCONNECT");
    }

    // v5 shortened form: empty body means normal disconnection.
    if body.is_empty() {
        return Ok(Packet::Disconnect(Disconnect::normal()));
    }

    let mut r = Reader::new(body);
    let reason_code = r.read_u8()?;
    let properties = if r.remaining() > 0 {
        Some(DisconnectProperties::read(&mut r)?)
    } else {
        None
    };

    reject_trailing(&r, "DISCONNECT")?;

    Ok(Packet::Disconnect(Disconnect {
        reason_code,
        properties,
    }))
}

fn decode_auth(body: &[u8], is_v5: bool) -> Result<Packet> {
    if !is_v5 {
        return Err(
            ProtocolError::ProtocolViolation("AUTH requires protocol level 5".into()).into(),
        );
    }

    if body.is_empty() {
        return Ok(Packet::Auth(Auth {
            reason_code: reason::SUCCESS,
            properties: None,
        }));
    }

    let mut r = Reader::new(body);
    let reason_code = r.read_u8()?;
    let properties = if r.remaining() > 0 {
        Some(AuthProperties::read(&mut r)?)
    } else {
        None
    };

    reject_trailing(&r, "AUTH")?;

    Ok(Packet::Auth(Auth {
        reason_code,
        properties,
    }))
}

/// Map a v5 CONNACK reason code onto the 3.x return-code table.
pub fn v3_return_code(reason_code: u8) -> u8 {
    match reason_code {
        reason::SUCCESS => 0x00,
        reason::UNSUPPORTED_PROTOCOL_VERSION => 0x01,
        reason::CLIENT_IDENTIFIER_NOT_VALID => 0x02,
        reason::SERVER_UNAVAILABLE | reason::SERVER_BUSY => 0x03,
        reason::BAD_USERNAME_OR_PASSWORD => 0x04,
        reason::NOT_AUTHORIZED | reason::BANNED => 0x05,
        _ => 0x03,
    }
}

/// Encode `packet` for a peer at `protocol_version`, appending to `buf`.
///
/// Rejects bodies whose remaining length cannot be represented in 4 varint
/// bytes.
pub fn encode_packet(packet: &Packet, protocol_version: u8, buf: &mut Vec<u8>) -> Result<()> {
    let is_v5 = protocol_version == 5;

    let (first_byte, body) = match packet {
        Packet::Connect(c) => ((PacketType::Connect as u8) << 4, encode_connect(c)?),
        Packet::Connack(c) => ((PacketType::Connack as u8) << 4, encode_connack(c, is_v5)?),
        Packet::Publish(p) => {
            let mut flags = (p.qos as u8) << 1;
            if p.dup {
                flags |= 0x08;
            }
            if p.retain {
                flags |= 0x01;
            }
            (
                (PacketType::Publish as u8) << 4 | flags,
                encode_publish(p, is_v5)?,
            )
        }
        Packet::Puback(a) => ((PacketType::Puback as u8) << 4, encode_ack(a, is_v5)?),
        Packet::Pubrec(a) => ((PacketType::Pubrec as u8) << 4, encode_ack(a, is_v5)?),
        Packet::Pubrel(a) => ((PacketType::Pubrel as u8) << 4 | 0x02, encode_ack(a, is_v5)?),
        Packet::Pubcomp(a) => ((PacketType::Pubcomp as u8) << 4, encode_ack(a, is_v5)?),
        Packet::Subscribe(s) => (
            (PacketType::Subscribe as u8) << 4 | 0x02,
            encode_subscribe(s, is_v5)?,
        ),
        Packet::Suback(s) => ((PacketType::Suback as u8) << 4, encode_suback(s, is_v5)?),
        Packet::Unsubscribe(u) => (
            (PacketType::Unsubscribe as u8) << 4 | 0x02,
            encode_unsubscribe(u, is_v5)?,
        ),
        Packet::Unsuback(u) => (
            (PacketType::Unsuback as u8) << 4,
            encode_unsuback(u, is_v5)?,
        ),
        Packet::Pingreq => ((PacketType::Pingreq as u8) << 4, Writer::new()),
        Packet::Pingresp => ((PacketType::Pingresp as u8) << 4, Writer::new()),
        Packet::Disconnect(d) => (
            (PacketType::Disconnect as u8) << 4,
            encode_disconnect(d, is_v5)?,
        ),
        Packet::Auth(a) => {
            if !is_v5 {
                return Err(ProtocolError::ProtocolViolation(
                    "AUTH requires protocol level 5".into(),
                )
                .into());
            }
            ((PacketType::Auth as u8) << 4, encode_auth(a)?)
        }
    };

    let body = body.into_bytes();
    buf.push(first_byte);
    varint::encode(body.len() as u32, buf)?;
    buf.extend_from_slice(&body);
    Ok(())
}

fn encode_connect(c: &Connect) -> Result<Writer> {
    let mut w = Writer::new();
    let is_v5 = c.protocol_version == 5;

    let name = if c.protocol_version == 3 {
        "MQIsdp"
    } else {
        "MQTT"
    };
    w.write_string(name)?;
    w.write_u8(c.protocol_version);

    let mut flags = 0u8;
    if c.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &c.will {
        flags |= 0x04;
        flags |= (will.qos as u8) << 3;
        if will.retain {
            flags |= 0x20;
        }
    }
    if c.password.is_some() {
        flags |= 0x40;
    }
    if c.username.is_some() {
        flags |= 0x80;
    }
    w.write_u8(flags);
    w.write_u16(c.keep_alive);

    if is_v5 {
        match &c.properties {
            Some(p) => p.write(&mut w)?,
            None => w.write_varint(0)?,
        }
    }

    w.write_string(&c.client_id)?;

    if let Some(will) = &c.will {
        if is_v5 {
            match &will.properties {
                Some(p) => p.write(&mut w)?,
                None => w.write_varint(0)?,
            }
        }
        w.write_string(&will.topic)?;
        w.write_binary(&will.payload)?;
    }

    if let Some(username) = &c.username {
        w.write_string(username)?;
    }
    if let Some(password) = &c.password {
        w.write_binary(password)?;
    }

    Ok(w)
}

fn encode_connack(c: &Connack, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_u8(c.session_present as u8);

    if is_v5 {
        w.write_u8(c.reason_code);
        match &c.properties {
            Some(p) => p.write(&mut w)?,
            None => w.write_varint(0)?,
        }
    } else {
        w.write_u8(v3_return_code(c.reason_code));
    }

    Ok(w)
}

fn encode_publish(p: &Publish, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_string(&p.topic)?;

    if p.qos != QoS::AtMostOnce {
        let id = p.packet_id.ok_or_else(|| {
            ProtocolError::MalformedPacket("QoS > 0 PUBLISH without packet identifier".into())
        })?;
        w.write_u16(nonzero_packet_id(id, "PUBLISH")?);
    }

    if is_v5 {
        match &p.properties {
            Some(props) => props.write(&mut w)?,
            None => w.write_varint(0)?,
        }
    }

    w.write_bytes(&p.payload);
    Ok(w)
}

fn encode_ack(a: &Ack, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_u16(a.packet_id);

    if is_v5 && (a.reason_code != reason::SUCCESS || a.properties.is_some()) {
        w.write_u8(a.reason_code);
        if let Some(p) = &a.properties {
            p.write(&mut w)?;
        }
    }

    Ok(w)
}

fn encode_subscribe(s: &Subscribe, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_u16(s.packet_id);

    if is_v5 {
        match &s.properties {
            Some(p) => p.write(&mut w)?,
            None => w.write_varint(0)?,
        }
    }

    for (filter, options) in &s.filters {
        w.write_string(filter)?;
        w.write_u8(options.to_byte(is_v5));
    }

    Ok(w)
}

fn encode_suback(s: &Suback, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_u16(s.packet_id);

    if is_v5 {
        match &s.properties {
            Some(p) => p.write(&mut w)?,
            None => w.write_varint(0)?,
        }
    }

    w.write_bytes(&s.reason_codes);
    Ok(w)
}

fn encode_unsubscribe(u: &Unsubscribe, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_u16(u.packet_id);

    if is_v5 {
        match &u.properties {
            Some(p) => p.write(&mut w)?,
            None => w.write_varint(0)?,
        }
    }

    for filter in &u.filters {
        w.write_string(filter)?;
    }

    Ok(w)
}

fn encode_unsuback(u: &Unsuback, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();
    w.write_u16(u.packet_id);

    if is_v5 {
        match &u.properties {
            Some(p) => p.write(&mut w)?,
            None => w.write_varint(0)?,
        }
        w.write_bytes(&u.reason_codes);
    }

    Ok(w)
}

fn encode_disconnect(d: &Disconnect, is_v5: bool) -> Result<Writer> {
    let mut w = Writer::new();

    if is_v5 && (d.reason_code != reason::NORMAL_DISCONNECTION || d.properties.is_some()) {
        w.write_u8(d.reason_code);
        if let Some(p) = &d.properties {
            p.write(&mut w)?;
        }
    }

    Ok(w)
}

fn encode_auth(a: &Auth) -> Result<Writer> {
    let mut w = Writer::new();

    if a.reason_code != reason::SUCCESS || a.properties.is_some() {
        w.write_u8(a.reason_code);
        if let Some(p) = &a.properties {
            p.write(&mut w)?;
        }
    }

    Ok(w)
}
