//! MQTT client protocol engine.
//!
//! Sans-IO: the engine never touches a socket. The application feeds
//! received bytes into [`Client::handle_incoming`], drains encoded output
//! with [`Client::take_outgoing`], and calls [`Client::keepalive`] from its
//! timer. Everything the application must react to comes out of
//! [`Client::next_event`].

use std::collections::VecDeque;
use std::mem;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mqrelay_core::frame::FrameBuffer;
use mqrelay_core::packet::{
    encode_packet, reason, Ack, Connack, Connect, Disconnect, Packet, Publish, QoS, Subscribe,
    SubscriptionOptions, Unsubscribe,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ConnectionState};
use crate::packet_id::PacketIdAllocator;
use crate::session::{OutboundStage, Session};

/// MQTT client protocol engine.
pub struct Client {
    config: ClientConfig,
    state: ConnectionState,
    frame: FrameBuffer,
    outgoing: Vec<u8>,
    events: VecDeque<ClientEvent>,
    packet_ids: PacketIdAllocator,
    session: Session,
    last_packet_time: Instant,
    pending_pings: u8,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            frame: FrameBuffer::new(),
            outgoing: Vec::new(),
            events: VecDeque::new(),
            packet_ids: PacketIdAllocator::new(),
            session: Session::new(),
            last_packet_time: Instant::now(),
            pending_pings: 0,
        }
    }

    /// Queue the CONNECT packet. Call when the transport reports the
    /// connection is established.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::InvalidState(
                "already connected or connecting".to_string(),
            ));
        }

        if self.config.clean_session {
            self.packet_ids.reset();
            self.session.reset();
        }
        self.frame.clear();

        let connect = Connect {
            protocol_version: self.config.protocol_version,
            clean_session: self.config.clean_session,
            keep_alive: self.config.keep_alive,
            client_id: self.config.client_id.clone(),
            will: self.config.will.as_ref().map(|w| w.to_packet()),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            properties: None,
        };
        self.encode(&Packet::Connect(connect))?;
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Queue a clean DISCONNECT and drop to the disconnected state. The
    /// broker discards the will on receipt.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.encode(&Packet::Disconnect(Disconnect::normal()))?;
        self.drop_connection(None);
        Ok(())
    }

    /// Queue a publish. Returns the packet id for QoS 1/2 so the
    /// application can correlate the later `PubAck`/`PubComp` event.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>> {
        self.require_connected()?;

        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(
                self.packet_ids
                    .allocate()
                    .ok_or(ClientError::PacketIdsExhausted)?,
            ),
        };

        let publish = Publish {
            dup: false,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            properties: None,
            payload: payload.into(),
        };

        if let Some(id) = packet_id {
            let stage = match qos {
                QoS::AtLeastOnce => OutboundStage::AwaitingPuback,
                _ => OutboundStage::AwaitingPubrec,
            };
            self.session.track_outbound(id, publish.clone(), stage);
        }

        self.encode(&Packet::Publish(publish))?;
        Ok(packet_id)
    }

    /// Subscribe to filters with plain QoS options.
    pub fn subscribe(&mut self, filters: &[(&str, QoS)]) -> Result<u16> {
        let filters: Vec<_> = filters
            .iter()
            .map(|(filter, qos)| (*filter, SubscriptionOptions::with_qos(*qos)))
            .collect();
        self.subscribe_with_options(&filters)
    }

    /// Subscribe with full v5 subscription options (no-local,
    /// retain-as-published, retain handling).
    pub fn subscribe_with_options(
        &mut self,
        filters: &[(&str, SubscriptionOptions)],
    ) -> Result<u16> {
        self.require_connected()?;

        let packet_id = self
            .packet_ids
            .allocate()
            .ok_or(ClientError::PacketIdsExhausted)?;
        let subscribe = Subscribe {
            packet_id,
            properties: None,
            filters: filters
                .iter()
                .map(|(filter, options)| (filter.to_string(), *options))
                .collect(),
        };
        self.encode(&Packet::Subscribe(subscribe))?;
        Ok(packet_id)
    }

    /// Unsubscribe from filters.
    pub fn unsubscribe(&mut self, filters: &[&str]) -> Result<u16> {
        self.require_connected()?;

        let packet_id = self
            .packet_ids
            .allocate()
            .ok_or(ClientError::PacketIdsExhausted)?;
        let unsubscribe = Unsubscribe {
            packet_id,
            properties: None,
            filters: filters.iter().map(|f| f.to_string()).collect(),
        };
        self.encode(&Packet::Unsubscribe(unsubscribe))?;
        Ok(packet_id)
    }

    /// Queue a PINGREQ regardless of the keep-alive schedule.
    pub fn ping(&mut self) -> Result<()> {
        self.require_connected()?;
        self.encode(&Packet::Pingreq)?;
        self.pending_pings += 1;
        Ok(())
    }

    /// Drive the keep-alive schedule; call this periodically from the
    /// application's timer. Sends a PINGREQ when the interval has elapsed
    /// and gives up on the connection after two unanswered pings.
    pub fn keepalive(&mut self, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Connected || self.config.keep_alive == 0 {
            return Ok(());
        }
        let interval = Duration::from_secs(u64::from(self.config.keep_alive));
        if now.duration_since(self.last_packet_time) < interval {
            return Ok(());
        }

        if self.pending_pings >= 2 {
            self.drop_connection(Some("keep-alive timeout".to_string()));
            return Ok(());
        }
        self.encode(&Packet::Pingreq)?;
        self.pending_pings += 1;
        self.last_packet_time = now;
        Ok(())
    }

    /// Feed bytes received from the transport. Decodes every complete
    /// packet, queueing events and any protocol responses (acks).
    pub fn handle_incoming(&mut self, data: &[u8]) -> Result<()> {
        self.frame.extend(data);
        loop {
            match self.frame.next_packet(self.config.protocol_version, 0)? {
                Some(packet) => self.handle_packet(packet)?,
                None => return Ok(()),
            }
        }
    }

    /// The transport hit EOF or an error; reflect that in the engine.
    pub fn transport_closed(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.drop_connection(Some("connection closed by peer".to_string()));
        }
    }

    /// Take everything queued for transmission.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Pop the next pending event, if any.
    pub fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    // === Internal methods ===

    fn require_connected(&self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    fn encode(&mut self, packet: &Packet) -> Result<()> {
        encode_packet(packet, self.config.protocol_version, &mut self.outgoing)?;
        Ok(())
    }

    fn drop_connection(&mut self, reason: Option<String>) {
        self.state = ConnectionState::Disconnected;
        self.frame.clear();
        self.pending_pings = 0;
        self.events.push_back(ClientEvent::Disconnected { reason });
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        self.last_packet_time = Instant::now();

        match packet {
            Packet::Connack(connack) => self.handle_connack(connack),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::Puback(ack) => {
                self.packet_ids.release(ack.packet_id);
                self.session.complete_outbound(ack.packet_id);
                self.events.push_back(ClientEvent::PubAck {
                    packet_id: ack.packet_id,
                    reason_code: ack.reason_code,
                });
                Ok(())
            }
            Packet::Pubrec(ack) => self.handle_pubrec(ack),
            Packet::Pubrel(ack) => {
                // Receive-side QoS 2 step 2: the broker releases the id.
                self.session.finish_inbound_qos2(ack.packet_id);
                self.encode(&Packet::Pubcomp(Ack::new(ack.packet_id)))
            }
            Packet::Pubcomp(ack) => {
                self.packet_ids.release(ack.packet_id);
                self.session.complete_outbound(ack.packet_id);
                self.events
                    .push_back(ClientEvent::PubComp { packet_id: ack.packet_id });
                Ok(())
            }
            Packet::Suback(suback) => {
                self.packet_ids.release(suback.packet_id);
                self.events.push_back(ClientEvent::SubAck {
                    packet_id: suback.packet_id,
                    reason_codes: suback.reason_codes,
                });
                Ok(())
            }
            Packet::Unsuback(unsuback) => {
                self.packet_ids.release(unsuback.packet_id);
                self.events.push_back(ClientEvent::UnsubAck {
                    packet_id: unsuback.packet_id,
                    reason_codes: unsuback.reason_codes,
                });
                Ok(())
            }
            Packet::Pingresp => {
                self.pending_pings = 0;
                Ok(())
            }
            Packet::Disconnect(disconnect) => {
                let reason = (disconnect.reason_code != reason::NORMAL_DISCONNECTION)
                    .then(|| format!("server disconnect ({:#04x})", disconnect.reason_code));
                self.drop_connection(reason);
                Ok(())
            }
            other => {
                log::debug!("ignoring unexpected {}", other.packet_type().name());
                Ok(())
            }
        }
    }

    fn handle_connack(&mut self, connack: Connack) -> Result<()> {
        if self.state != ConnectionState::Connecting {
            return Err(ClientError::InvalidState(
                "CONNACK outside of connect handshake".to_string(),
            ));
        }

        if connack.reason_code != reason::SUCCESS {
            let detail = format!("reason code {:#04x}", connack.reason_code);
            self.drop_connection(Some(detail.clone()));
            return Err(ClientError::ConnectionRefused(detail));
        }

        self.state = ConnectionState::Connected;
        self.events.push_back(ClientEvent::Connected {
            session_present: connack.session_present,
        });

        if !self.config.clean_session {
            self.resend_pending()?;
        }
        Ok(())
    }

    /// Redeliver unacknowledged QoS 1/2 publishes in their original send
    /// order after a non-clean-session reconnect [MQTT-4.6.0-1].
    fn resend_pending(&mut self) -> Result<()> {
        for (packet_id, pending) in self.session.pending_in_order() {
            match pending.stage {
                // PUBREL already went out; resume the flow from there.
                OutboundStage::AwaitingPubcomp => {
                    self.encode(&Packet::Pubrel(Ack::new(packet_id)))?;
                }
                _ => {
                    let mut publish = pending.publish;
                    publish.dup = true;
                    self.encode(&Packet::Publish(publish))?;
                }
            }
        }
        Ok(())
    }

    fn handle_publish(&mut self, publish: Publish) -> Result<()> {
        // Protocol responses ride along; the application only sees the
        // Message event.
        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.encode(&Packet::Puback(Ack::new(packet_id)))?;
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                let first_delivery = self.session.begin_inbound_qos2(packet_id);
                self.encode(&Packet::Pubrec(Ack::new(packet_id)))?;
                if !first_delivery {
                    // Duplicate of an in-flight QoS 2 delivery.
                    return Ok(());
                }
            }
            _ => {}
        }

        self.events.push_back(ClientEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            packet_id: publish.packet_id,
        });
        Ok(())
    }

    fn handle_pubrec(&mut self, ack: Ack) -> Result<()> {
        if ack.reason_code >= 0x80 {
            // Broker rejected the publish; the flow ends without PUBREL.
            self.packet_ids.release(ack.packet_id);
            self.session.complete_outbound(ack.packet_id);
            self.events.push_back(ClientEvent::PubAck {
                packet_id: ack.packet_id,
                reason_code: ack.reason_code,
            });
            return Ok(());
        }
        if self.session.mark_released(ack.packet_id) {
            self.encode(&Packet::Pubrel(Ack::new(ack.packet_id)))?;
        }
        Ok(())
    }
}
