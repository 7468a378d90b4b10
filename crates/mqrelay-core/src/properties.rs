//! MQTT 5.0 property blocks.
//!
//! Each v5 packet family carries a varint-length-prefixed block of
//! `(identifier, value)` pairs. Identifiers are scoped per family: an id
//! that is valid on CONNECT is a protocol error on PUBLISH. Duplicate
//! single-value properties are a protocol error; User Property may repeat.

use crate::codec::{Reader, Writer};
use crate::error::{ProtocolError, Result};

/// Property identifiers from the 5.0 table.
pub mod id {
    pub const PAYLOAD_FORMAT_INDICATOR: u8 = 0x01;
    pub const MESSAGE_EXPIRY_INTERVAL: u8 = 0x02;
    pub const CONTENT_TYPE: u8 = 0x03;
    pub const RESPONSE_TOPIC: u8 = 0x08;
    pub const CORRELATION_DATA: u8 = 0x09;
    pub const SUBSCRIPTION_IDENTIFIER: u8 = 0x0B;
    pub const SESSION_EXPIRY_INTERVAL: u8 = 0x11;
    pub const ASSIGNED_CLIENT_IDENTIFIER: u8 = 0x12;
    pub const SERVER_KEEP_ALIVE: u8 = 0x13;
    pub const AUTHENTICATION_METHOD: u8 = 0x15;
    pub const AUTHENTICATION_DATA: u8 = 0x16;
    pub const REQUEST_PROBLEM_INFORMATION: u8 = 0x17;
    pub const WILL_DELAY_INTERVAL: u8 = 0x18;
    pub const REQUEST_RESPONSE_INFORMATION: u8 = 0x19;
    pub const RESPONSE_INFORMATION: u8 = 0x1A;
    pub const SERVER_REFERENCE: u8 = 0x1C;
    pub const REASON_STRING: u8 = 0x1F;
    pub const RECEIVE_MAXIMUM: u8 = 0x21;
    pub const TOPIC_ALIAS_MAXIMUM: u8 = 0x22;
    pub const TOPIC_ALIAS: u8 = 0x23;
    pub const MAXIMUM_QOS: u8 = 0x24;
    pub const RETAIN_AVAILABLE: u8 = 0x25;
    pub const USER_PROPERTY: u8 = 0x26;
    pub const MAXIMUM_PACKET_SIZE: u8 = 0x27;
    pub const WILDCARD_SUBSCRIPTION_AVAILABLE: u8 = 0x28;
    pub const SUBSCRIPTION_IDENTIFIERS_AVAILABLE: u8 = 0x29;
    pub const SHARED_SUBSCRIPTION_AVAILABLE: u8 = 0x2A;
}

fn unknown(id: u8) -> crate::error::Error {
    ProtocolError::ProtocolViolation(format!("unexpected property id {id:#04x}")).into()
}

fn duplicate(name: &str) -> crate::error::Error {
    ProtocolError::ProtocolViolation(format!("duplicate {name} property")).into()
}

fn put<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<()> {
    if slot.is_some() {
        return Err(duplicate(name));
    }
    *slot = Some(value);
    Ok(())
}

fn read_bool(r: &mut Reader) -> Result<bool> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(ProtocolError::ProtocolViolation(format!(
            "boolean property value {v} out of range"
        ))
        .into()),
    }
}

/// Reads the block length and returns the end position, for the per-family
/// read loops below.
fn block_end(r: &mut Reader) -> Result<usize> {
    let len = r.read_varint()? as usize;
    Ok(r.position() + len)
}

fn check_end(r: &Reader, end: usize) -> Result<()> {
    if r.position() != end {
        return Err(
            ProtocolError::MalformedPacket("property value overran block length".into()).into(),
        );
    }
    Ok(())
}

/// CONNECT properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectProperties {
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: Option<u16>,
    pub request_response_information: Option<bool>,
    pub request_problem_information: Option<bool>,
    pub user_properties: Vec<(String, String)>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
}

impl ConnectProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::SESSION_EXPIRY_INTERVAL => put(
                    &mut p.session_expiry_interval,
                    r.read_u32()?,
                    "Session Expiry Interval",
                )?,
                id::RECEIVE_MAXIMUM => {
                    put(&mut p.receive_maximum, r.read_u16()?, "Receive Maximum")?
                }
                id::MAXIMUM_PACKET_SIZE => put(
                    &mut p.maximum_packet_size,
                    r.read_u32()?,
                    "Maximum Packet Size",
                )?,
                id::TOPIC_ALIAS_MAXIMUM => put(
                    &mut p.topic_alias_maximum,
                    r.read_u16()?,
                    "Topic Alias Maximum",
                )?,
                id::REQUEST_RESPONSE_INFORMATION => put(
                    &mut p.request_response_information,
                    read_bool(r)?,
                    "Request Response Information",
                )?,
                id::REQUEST_PROBLEM_INFORMATION => put(
                    &mut p.request_problem_information,
                    read_bool(r)?,
                    "Request Problem Information",
                )?,
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                id::AUTHENTICATION_METHOD => put(
                    &mut p.authentication_method,
                    r.read_string()?,
                    "Authentication Method",
                )?,
                id::AUTHENTICATION_DATA => put(
                    &mut p.authentication_data,
                    r.read_binary()?.to_vec(),
                    "Authentication Data",
                )?,
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = self.session_expiry_interval {
                b.write_u8(id::SESSION_EXPIRY_INTERVAL);
                b.write_u32(v);
            }
            if let Some(v) = self.receive_maximum {
                b.write_u8(id::RECEIVE_MAXIMUM);
                b.write_u16(v);
            }
            if let Some(v) = self.maximum_packet_size {
                b.write_u8(id::MAXIMUM_PACKET_SIZE);
                b.write_u32(v);
            }
            if let Some(v) = self.topic_alias_maximum {
                b.write_u8(id::TOPIC_ALIAS_MAXIMUM);
                b.write_u16(v);
            }
            if let Some(v) = self.request_response_information {
                b.write_u8(id::REQUEST_RESPONSE_INFORMATION);
                b.write_u8(v as u8);
            }
            if let Some(v) = self.request_problem_information {
                b.write_u8(id::REQUEST_PROBLEM_INFORMATION);
                b.write_u8(v as u8);
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            if let Some(v) = &self.authentication_method {
                b.write_u8(id::AUTHENTICATION_METHOD);
                b.write_string(v)?;
            }
            if let Some(v) = &self.authentication_data {
                b.write_u8(id::AUTHENTICATION_DATA);
                b.write_binary(v)?;
            }
            Ok(())
        })
    }
}

/// Will properties, nested inside the CONNECT payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WillProperties {
    pub will_delay_interval: Option<u32>,
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub user_properties: Vec<(String, String)>,
}

impl WillProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::WILL_DELAY_INTERVAL => put(
                    &mut p.will_delay_interval,
                    r.read_u32()?,
                    "Will Delay Interval",
                )?,
                id::PAYLOAD_FORMAT_INDICATOR => put(
                    &mut p.payload_format_indicator,
                    r.read_u8()?,
                    "Payload Format Indicator",
                )?,
                id::MESSAGE_EXPIRY_INTERVAL => put(
                    &mut p.message_expiry_interval,
                    r.read_u32()?,
                    "Message Expiry Interval",
                )?,
                id::CONTENT_TYPE => put(&mut p.content_type, r.read_string()?, "Content Type")?,
                id::RESPONSE_TOPIC => {
                    put(&mut p.response_topic, r.read_string()?, "Response Topic")?
                }
                id::CORRELATION_DATA => put(
                    &mut p.correlation_data,
                    r.read_binary()?.to_vec(),
                    "Correlation Data",
                )?,
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = self.will_delay_interval {
                b.write_u8(id::WILL_DELAY_INTERVAL);
                b.write_u32(v);
            }
            if let Some(v) = self.payload_format_indicator {
                b.write_u8(id::PAYLOAD_FORMAT_INDICATOR);
                b.write_u8(v);
            }
            if let Some(v) = self.message_expiry_interval {
                b.write_u8(id::MESSAGE_EXPIRY_INTERVAL);
                b.write_u32(v);
            }
            if let Some(v) = &self.content_type {
                b.write_u8(id::CONTENT_TYPE);
                b.write_string(v)?;
            }
            if let Some(v) = &self.response_topic {
                b.write_u8(id::RESPONSE_TOPIC);
                b.write_string(v)?;
            }
            if let Some(v) = &self.correlation_data {
                b.write_u8(id::CORRELATION_DATA);
                b.write_binary(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

/// CONNACK properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnackProperties {
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub retain_available: Option<bool>,
    pub maximum_packet_size: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub topic_alias_maximum: Option<u16>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
    pub wildcard_subscription_available: Option<bool>,
    pub subscription_identifiers_available: Option<bool>,
    pub shared_subscription_available: Option<bool>,
    pub server_keep_alive: Option<u16>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
}

impl ConnackProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::SESSION_EXPIRY_INTERVAL => put(
                    &mut p.session_expiry_interval,
                    r.read_u32()?,
                    "Session Expiry Interval",
                )?,
                id::RECEIVE_MAXIMUM => {
                    put(&mut p.receive_maximum, r.read_u16()?, "Receive Maximum")?
                }
                id::MAXIMUM_QOS => put(&mut p.maximum_qos, r.read_u8()?, "Maximum QoS")?,
                id::RETAIN_AVAILABLE => {
                    put(&mut p.retain_available, read_bool(r)?, "Retain Available")?
                }
                id::MAXIMUM_PACKET_SIZE => put(
                    &mut p.maximum_packet_size,
                    r.read_u32()?,
                    "Maximum Packet Size",
                )?,
                id::ASSIGNED_CLIENT_IDENTIFIER => put(
                    &mut p.assigned_client_identifier,
                    r.read_string()?,
                    "Assigned Client Identifier",
                )?,
                id::TOPIC_ALIAS_MAXIMUM => put(
                    &mut p.topic_alias_maximum,
                    r.read_u16()?,
                    "Topic Alias Maximum",
                )?,
                id::REASON_STRING => {
                    put(&mut p.reason_string, r.read_string()?, "Reason String")?
                }
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                id::WILDCARD_SUBSCRIPTION_AVAILABLE => put(
                    &mut p.wildcard_subscription_available,
                    read_bool(r)?,
                    "Wildcard Subscription Available",
                )?,
                id::SUBSCRIPTION_IDENTIFIERS_AVAILABLE => put(
                    &mut p.subscription_identifiers_available,
                    read_bool(r)?,
                    "Subscription Identifiers Available",
                )?,
                id::SHARED_SUBSCRIPTION_AVAILABLE => put(
                    &mut p.shared_subscription_available,
                    read_bool(r)?,
                    "Shared Subscription Available",
                )?,
                id::SERVER_KEEP_ALIVE => {
                    put(&mut p.server_keep_alive, r.read_u16()?, "Server Keep Alive")?
                }
                id::RESPONSE_INFORMATION => put(
                    &mut p.response_information,
                    r.read_string()?,
                    "Response Information",
                )?,
                id::SERVER_REFERENCE => {
                    put(&mut p.server_reference, r.read_string()?, "Server Reference")?
                }
                id::AUTHENTICATION_METHOD => put(
                    &mut p.authentication_method,
                    r.read_string()?,
                    "Authentication Method",
                )?,
                id::AUTHENTICATION_DATA => put(
                    &mut p.authentication_data,
                    r.read_binary()?.to_vec(),
                    "Authentication Data",
                )?,
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = self.session_expiry_interval {
                b.write_u8(id::SESSION_EXPIRY_INTERVAL);
                b.write_u32(v);
            }
            if let Some(v) = self.receive_maximum {
                b.write_u8(id::RECEIVE_MAXIMUM);
                b.write_u16(v);
            }
            if let Some(v) = self.maximum_qos {
                b.write_u8(id::MAXIMUM_QOS);
                b.write_u8(v);
            }
            if let Some(v) = self.retain_available {
                b.write_u8(id::RETAIN_AVAILABLE);
                b.write_u8(v as u8);
            }
            if let Some(v) = self.maximum_packet_size {
                b.write_u8(id::MAXIMUM_PACKET_SIZE);
                b.write_u32(v);
            }
            if let Some(v) = &self.assigned_client_identifier {
                b.write_u8(id::ASSIGNED_CLIENT_IDENTIFIER);
                b.write_string(v)?;
            }
            if let Some(v) = self.topic_alias_maximum {
                b.write_u8(id::TOPIC_ALIAS_MAXIMUM);
                b.write_u16(v);
            }
            if let Some(v) = &self.reason_string {
                b.write_u8(id::REASON_STRING);
                b.write_string(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            if let Some(v) = self.wildcard_subscription_available {
                b.write_u8(id::WILDCARD_SUBSCRIPTION_AVAILABLE);
                b.write_u8(v as u8);
            }
            if let Some(v) = self.subscription_identifiers_available {
                b.write_u8(id::SUBSCRIPTION_IDENTIFIERS_AVAILABLE);
                b.write_u8(v as u8);
            }
            if let Some(v) = self.shared_subscription_available {
                b.write_u8(id::SHARED_SUBSCRIPTION_AVAILABLE);
                b.write_u8(v as u8);
            }
            if let Some(v) = self.server_keep_alive {
                b.write_u8(id::SERVER_KEEP_ALIVE);
                b.write_u16(v);
            }
            if let Some(v) = &self.response_information {
                b.write_u8(id::RESPONSE_INFORMATION);
                b.write_string(v)?;
            }
            if let Some(v) = &self.server_reference {
                b.write_u8(id::SERVER_REFERENCE);
                b.write_string(v)?;
            }
            if let Some(v) = &self.authentication_method {
                b.write_u8(id::AUTHENTICATION_METHOD);
                b.write_string(v)?;
            }
            if let Some(v) = &self.authentication_data {
                b.write_u8(id::AUTHENTICATION_DATA);
                b.write_binary(v)?;
            }
            Ok(())
        })
    }
}

/// PUBLISH properties.
///
/// Subscription Identifier may repeat on outbound server publishes when a
/// message matched several subscriptions, so it is a `Vec` here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishProperties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub topic_alias: Option<u16>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub user_properties: Vec<(String, String)>,
    pub subscription_identifiers: Vec<u32>,
    pub content_type: Option<String>,
}

impl PublishProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::PAYLOAD_FORMAT_INDICATOR => put(
                    &mut p.payload_format_indicator,
                    r.read_u8()?,
                    "Payload Format Indicator",
                )?,
                id::MESSAGE_EXPIRY_INTERVAL => put(
                    &mut p.message_expiry_interval,
                    r.read_u32()?,
                    "Message Expiry Interval",
                )?,
                id::TOPIC_ALIAS => put(&mut p.topic_alias, r.read_u16()?, "Topic Alias")?,
                id::RESPONSE_TOPIC => {
                    put(&mut p.response_topic, r.read_string()?, "Response Topic")?
                }
                id::CORRELATION_DATA => put(
                    &mut p.correlation_data,
                    r.read_binary()?.to_vec(),
                    "Correlation Data",
                )?,
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                id::SUBSCRIPTION_IDENTIFIER => {
                    let v = r.read_varint()?;
                    if v == 0 {
                        return Err(ProtocolError::ProtocolViolation(
                            "Subscription Identifier must be nonzero".into(),
                        )
                        .into());
                    }
                    p.subscription_identifiers.push(v);
                }
                id::CONTENT_TYPE => put(&mut p.content_type, r.read_string()?, "Content Type")?,
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = self.payload_format_indicator {
                b.write_u8(id::PAYLOAD_FORMAT_INDICATOR);
                b.write_u8(v);
            }
            if let Some(v) = self.message_expiry_interval {
                b.write_u8(id::MESSAGE_EXPIRY_INTERVAL);
                b.write_u32(v);
            }
            if let Some(v) = self.topic_alias {
                b.write_u8(id::TOPIC_ALIAS);
                b.write_u16(v);
            }
            if let Some(v) = &self.response_topic {
                b.write_u8(id::RESPONSE_TOPIC);
                b.write_string(v)?;
            }
            if let Some(v) = &self.correlation_data {
                b.write_u8(id::CORRELATION_DATA);
                b.write_binary(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            for v in &self.subscription_identifiers {
                b.write_u8(id::SUBSCRIPTION_IDENTIFIER);
                b.write_varint(*v)?;
            }
            if let Some(v) = &self.content_type {
                b.write_u8(id::CONTENT_TYPE);
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

/// Properties shared by PUBACK, PUBREC, PUBREL, PUBCOMP, SUBACK and
/// UNSUBACK: a reason string plus user properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AckProperties {
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl AckProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::REASON_STRING => {
                    put(&mut p.reason_string, r.read_string()?, "Reason String")?
                }
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = &self.reason_string {
                b.write_u8(id::REASON_STRING);
                b.write_string(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

/// SUBSCRIBE properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeProperties {
    pub subscription_identifier: Option<u32>,
    pub user_properties: Vec<(String, String)>,
}

impl SubscribeProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::SUBSCRIPTION_IDENTIFIER => {
                    let v = r.read_varint()?;
                    if v == 0 {
                        return Err(ProtocolError::ProtocolViolation(
                            "Subscription Identifier must be nonzero".into(),
                        )
                        .into());
                    }
                    put(&mut p.subscription_identifier, v, "Subscription Identifier")?;
                }
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = self.subscription_identifier {
                b.write_u8(id::SUBSCRIPTION_IDENTIFIER);
                b.write_varint(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

/// UNSUBSCRIBE properties: user properties only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnsubscribeProperties {
    pub user_properties: Vec<(String, String)>,
}

impl UnsubscribeProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

/// DISCONNECT properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisconnectProperties {
    pub session_expiry_interval: Option<u32>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
    pub server_reference: Option<String>,
}

impl DisconnectProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::SESSION_EXPIRY_INTERVAL => put(
                    &mut p.session_expiry_interval,
                    r.read_u32()?,
                    "Session Expiry Interval",
                )?,
                id::REASON_STRING => {
                    put(&mut p.reason_string, r.read_string()?, "Reason String")?
                }
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                id::SERVER_REFERENCE => {
                    put(&mut p.server_reference, r.read_string()?, "Server Reference")?
                }
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = self.session_expiry_interval {
                b.write_u8(id::SESSION_EXPIRY_INTERVAL);
                b.write_u32(v);
            }
            if let Some(v) = &self.reason_string {
                b.write_u8(id::REASON_STRING);
                b.write_string(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            if let Some(v) = &self.server_reference {
                b.write_u8(id::SERVER_REFERENCE);
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

/// AUTH properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthProperties {
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl AuthProperties {
    pub fn read(r: &mut Reader) -> Result<Self> {
        let end = block_end(r)?;
        let mut p = Self::default();
        while r.position() < end {
            match r.read_u8()? {
                id::AUTHENTICATION_METHOD => put(
                    &mut p.authentication_method,
                    r.read_string()?,
                    "Authentication Method",
                )?,
                id::AUTHENTICATION_DATA => put(
                    &mut p.authentication_data,
                    r.read_binary()?.to_vec(),
                    "Authentication Data",
                )?,
                id::REASON_STRING => {
                    put(&mut p.reason_string, r.read_string()?, "Reason String")?
                }
                id::USER_PROPERTY => {
                    p.user_properties.push((r.read_string()?, r.read_string()?))
                }
                other => return Err(unknown(other)),
            }
        }
        check_end(r, end)?;
        Ok(p)
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        w.write_block(|b| {
            if let Some(v) = &self.authentication_method {
                b.write_u8(id::AUTHENTICATION_METHOD);
                b.write_string(v)?;
            }
            if let Some(v) = &self.authentication_data {
                b.write_u8(id::AUTHENTICATION_DATA);
                b.write_binary(v)?;
            }
            if let Some(v) = &self.reason_string {
                b.write_u8(id::REASON_STRING);
                b.write_string(v)?;
            }
            for (k, v) in &self.user_properties {
                b.write_u8(id::USER_PROPERTY);
                b.write_string(k)?;
                b.write_string(v)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_connect(props: &ConnectProperties) -> ConnectProperties {
        let mut w = Writer::new();
        props.write(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        ConnectProperties::read(&mut r).unwrap()
    }

    #[test]
    fn test_connect_properties_roundtrip() {
        let props = ConnectProperties {
            session_expiry_interval: Some(3600),
            receive_maximum: Some(20),
            maximum_packet_size: Some(1024),
            user_properties: vec![("region".into(), "eu-west".into())],
            ..Default::default()
        };
        assert_eq!(roundtrip_connect(&props), props);
    }

    #[test]
    fn test_empty_block_is_default() {
        let mut r = Reader::new(&[0x00]);
        assert_eq!(ConnectProperties::read(&mut r).unwrap(), ConnectProperties::default());
    }

    #[test]
    fn test_unknown_id_rejected() {
        // 0x23 (Topic Alias) is not valid on CONNECT.
        let block = [0x03, 0x23, 0x00, 0x05];
        let mut r = Reader::new(&block);
        assert!(ConnectProperties::read(&mut r).is_err());
    }

    #[test]
    fn test_duplicate_single_value_rejected() {
        // Session Expiry Interval twice.
        let block = [
            0x0A, 0x11, 0x00, 0x00, 0x00, 0x3C, 0x11, 0x00, 0x00, 0x00, 0x78,
        ];
        let mut r = Reader::new(&block);
        assert!(ConnectProperties::read(&mut r).is_err());
    }

    #[test]
    fn test_repeated_user_property_allowed() {
        let props = AckProperties {
            reason_string: None,
            user_properties: vec![
                ("a".into(), "1".into()),
                ("a".into(), "2".into()),
            ],
        };
        let mut w = Writer::new();
        props.write(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(AckProperties::read(&mut r).unwrap(), props);
    }

    #[test]
    fn test_zero_subscription_identifier_rejected() {
        let block = [0x02, 0x0B, 0x00];
        let mut r = Reader::new(&block);
        assert!(SubscribeProperties::read(&mut r).is_err());
    }

    #[test]
    fn test_value_overrunning_block_rejected() {
        // Block claims 2 bytes but the contained string header needs more.
        let block = [0x02, 0x1F, 0x00, 0x04, b'o', b'o', b'p', b's'];
        let mut r = Reader::new(&block);
        assert!(AckProperties::read(&mut r).is_err());
    }
}
