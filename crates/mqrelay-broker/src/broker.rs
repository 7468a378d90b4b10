//! The broker engine.
//!
//! Transport-agnostic: the embedding application owns the sockets and
//! drives the engine through three callbacks ([`Broker::connection_opened`],
//! [`Broker::data_received`] and [`Broker::connection_closed`]) plus a
//! periodic [`Broker::sweep_keepalive`]. Outbound traffic leaves through the
//! [`PacketSink`] the embedder supplies.
//!
//! Decode is strictly sequential per connection (the state mutex serializes
//! it); different connections proceed concurrently. Fan-out never takes
//! another connection's state mutex; everything it needs from the target
//! lives in atomics on the handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use bytes::Bytes;
use mqrelay_core::packet::{
    encode_packet, reason, Disconnect, Packet, PacketType, Publish, QoS,
};
use mqrelay_core::{Error, ProtocolError};
use parking_lot::RwLock;

use crate::auth::CredentialStore;
use crate::config::BrokerConfig;
use crate::connection::{ConnState, ConnectionHandle, ConnectionId, DispatchResult, PacketSink};
use crate::handlers;
use crate::retained::RetainedStore;
use crate::subscription::SubscriptionStore;

pub struct Broker {
    pub(crate) config: BrokerConfig,
    pub(crate) sink: Arc<dyn PacketSink>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) connections: RwLock<AHashMap<ConnectionId, Arc<ConnectionHandle>>>,
    /// client id -> live connection, for session takeover.
    pub(crate) client_ids: RwLock<AHashMap<String, ConnectionId>>,
    pub(crate) subscriptions: RwLock<SubscriptionStore>,
    pub(crate) retained: RwLock<RetainedStore>,
    next_connection_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl Broker {
    pub fn new(
        config: BrokerConfig,
        sink: Arc<dyn PacketSink>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let retained = RetainedStore::new(
            std::time::Duration::from_secs(config.retained.expire_interval_secs),
            config.retained.max_deliveries,
        );
        Self {
            config,
            sink,
            credentials,
            connections: RwLock::new(AHashMap::new()),
            client_ids: RwLock::new(AHashMap::new()),
            subscriptions: RwLock::new(SubscriptionStore::new()),
            retained: RwLock::new(retained),
            next_connection_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The transport accepted a connection. Returns the identity the broker
    /// will use for it in every later callback.
    pub fn connection_opened(&self, remote_addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle::new(id, remote_addr));

        if self.shutting_down.load(Ordering::Relaxed) {
            log::debug!("{id}: rejected, broker shutting down");
            self.sink.close(id);
            return id;
        }

        log::debug!("{id}: opened from {remote_addr}");
        self.connections.write().insert(id, handle);
        id
    }

    /// The transport delivered raw bytes for `id`. Decodes and processes
    /// every complete packet in the chunk, returning one result per packet.
    pub fn data_received(&self, id: ConnectionId, data: &[u8]) -> Vec<DispatchResult> {
        let Some(handle) = self.connections.read().get(&id).cloned() else {
            return Vec::new();
        };

        *handle.last_activity.lock() = Instant::now();

        let mut results = Vec::new();
        let mut state = handle.state.lock();
        state.frame.extend(data);

        loop {
            if handle.closing.load(Ordering::Relaxed) {
                break;
            }
            match state
                .frame
                .next_packet(handle.encode_version(), self.config.limits.max_packet_size)
            {
                Ok(Some(packet)) => {
                    results.push(self.dispatch(&handle, &mut state, packet));
                }
                Ok(None) => break,
                Err(err) => {
                    state.frame.clear();
                    results.push(self.stream_failure(&handle, &err));
                    break;
                }
            }
        }

        results
    }

    fn dispatch(
        &self,
        handle: &Arc<ConnectionHandle>,
        state: &mut ConnState,
        packet: Packet,
    ) -> DispatchResult {
        log::trace!("{}: received {}", handle.id, packet.packet_type().name());

        if !handle.connected.load(Ordering::Relaxed) && packet.packet_type() != PacketType::Connect
        {
            return self.fail_connection(
                handle,
                ProtocolError::FirstPacketNotConnect.reason_code(),
                "first packet was not CONNECT",
            );
        }

        match packet {
            Packet::Connect(connect) => handlers::connect::handle(self, handle, state, connect),
            Packet::Publish(publish) => handlers::publish::handle(self, handle, publish),
            Packet::Puback(ack) => handlers::qos::handle_puback(handle, ack),
            Packet::Pubrec(ack) => handlers::qos::handle_pubrec(self, handle, ack),
            Packet::Pubrel(ack) => handlers::qos::handle_pubrel(self, handle, ack),
            Packet::Pubcomp(ack) => handlers::qos::handle_pubcomp(handle, ack),
            Packet::Subscribe(subscribe) => {
                handlers::subscribe::handle_subscribe(self, handle, state, subscribe)
            }
            Packet::Unsubscribe(unsubscribe) => {
                handlers::subscribe::handle_unsubscribe(self, handle, state, unsubscribe)
            }
            Packet::Pingreq => {
                self.send_packet(handle, &Packet::Pingresp);
                DispatchResult::ok(Some(PacketType::Pingresp))
            }
            Packet::Disconnect(disconnect) => {
                handlers::disconnect::handle(self, handle, state, disconnect)
            }
            Packet::Auth(_) => {
                // Extended authentication is never negotiated (no
                // Authentication Method is advertised in CONNACK).
                self.fail_connection(handle, reason::PROTOCOL_ERROR, "unexpected AUTH packet")
            }
            // Server-to-client packets arriving at the server.
            other => self.fail_connection(
                handle,
                reason::PROTOCOL_ERROR,
                format!("client sent {}", other.packet_type().name()),
            ),
        }
    }

    /// The transport lost or finished closing a connection. Publishes the
    /// will (when one is still armed) and releases all registry state.
    pub fn connection_closed(&self, id: ConnectionId) {
        let Some(handle) = self.connections.write().remove(&id) else {
            return;
        };

        let (will, client_id) = {
            let mut state = handle.state.lock();
            (state.will.take(), state.session.client_id.clone())
        };

        if handle.connected.load(Ordering::Relaxed) {
            log::info!("{id}: client '{client_id}' disconnected");
        } else {
            log::debug!("{id}: closed before CONNECT");
        }

        if let Some(will) = will {
            let publish = Publish {
                dup: false,
                qos: will.qos,
                retain: will.retain,
                topic: will.topic,
                packet_id: None,
                properties: will.properties.map(|p| {
                    mqrelay_core::properties::PublishProperties {
                        payload_format_indicator: p.payload_format_indicator,
                        message_expiry_interval: p.message_expiry_interval,
                        content_type: p.content_type,
                        response_topic: p.response_topic,
                        correlation_data: p.correlation_data,
                        user_properties: p.user_properties,
                        ..Default::default()
                    }
                }),
                payload: will.payload,
            };
            log::debug!("{id}: publishing will to '{}'", publish.topic);
            if publish.retain {
                self.retained.write().store(&publish, Instant::now());
            }
            self.fanout(&publish, Some(id));
        }

        {
            let mut client_ids = self.client_ids.write();
            if client_ids.get(&client_id) == Some(&id) {
                client_ids.remove(&client_id);
            }
        }
        self.subscriptions.write().remove_connection(id);
    }

    /// Disconnect every connection whose keep-alive interval has lapsed by
    /// more than 1.5x. Connections that never sent CONNECT get the
    /// configured default keep-alive as their deadline instead, so an idle
    /// pre-auth transport cannot hold a slot forever. Iterates a snapshot so
    /// publishers never stall behind the sweep.
    pub fn sweep_keepalive(&self, now: Instant) {
        let snapshot: Vec<Arc<ConnectionHandle>> =
            self.connections.read().values().cloned().collect();
        let connect_grace =
            std::time::Duration::from_secs(u64::from(self.config.session.default_keep_alive));

        for handle in snapshot {
            if handle.closing.load(Ordering::Relaxed) {
                continue;
            }
            let last = *handle.last_activity.lock();

            if !handle.connected.load(Ordering::Relaxed) {
                if !connect_grace.is_zero() && now.duration_since(last) > connect_grace {
                    log::info!(
                        "{}: no CONNECT within {}s",
                        handle.id,
                        connect_grace.as_secs()
                    );
                    self.fail_connection(&handle, reason::KEEP_ALIVE_TIMEOUT, "CONNECT timed out");
                }
                continue;
            }

            let keep_alive = handle.keep_alive.load(Ordering::Relaxed);
            if keep_alive == 0 {
                continue;
            }
            let deadline = std::time::Duration::from_millis(u64::from(keep_alive) * 1500);
            if now.duration_since(last) > deadline {
                log::info!("{}: keep-alive expired ({}s)", handle.id, keep_alive);
                self.fail_connection(&handle, reason::KEEP_ALIVE_TIMEOUT, "keep-alive expired");
            }
        }
    }

    /// Graceful shutdown: notify v5 peers, close every transport connection
    /// and drop all shared state. Wills are not published: shutdown is a
    /// server-initiated close, not a client failure.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);

        let drained: Vec<Arc<ConnectionHandle>> =
            self.connections.write().drain().map(|(_, h)| h).collect();
        log::info!("shutting down, closing {} connections", drained.len());

        for handle in drained {
            handle.state.lock().will = None;
            if handle.is_v5() && handle.connected.load(Ordering::Relaxed) {
                self.send_packet(
                    &handle,
                    &Packet::Disconnect(Disconnect::with_reason(reason::SERVER_SHUTTING_DOWN)),
                );
            }
            handle.closing.store(true, Ordering::Relaxed);
            self.sink.close(handle.id);
        }

        self.client_ids.write().clear();
        *self.subscriptions.write() = SubscriptionStore::new();
    }

    // -- internals shared with the handlers --

    /// Encode `packet` for this peer's protocol level and hand it to the
    /// sink.
    pub(crate) fn send_packet(&self, handle: &ConnectionHandle, packet: &Packet) {
        let mut buf = Vec::new();
        match encode_packet(packet, handle.encode_version(), &mut buf) {
            Ok(()) => self.sink.send(handle.id, Bytes::from(buf)),
            Err(err) => log::warn!(
                "{}: dropping unencodable {}: {err}",
                handle.id,
                packet.packet_type().name()
            ),
        }
    }

    /// Terminate a connection over a protocol violation: DISCONNECT with the
    /// reason code on v5, then close. The will stays armed; an errored
    /// connection counts as an abnormal disconnect.
    pub(crate) fn fail_connection(
        &self,
        handle: &ConnectionHandle,
        reason_code: u8,
        message: impl Into<String>,
    ) -> DispatchResult {
        let message = message.into();
        log::warn!("{}: {message} (reason {reason_code:#04x})", handle.id);

        let response = if handle.is_v5() {
            self.send_packet(
                handle,
                &Packet::Disconnect(Disconnect::with_reason(reason_code)),
            );
            Some(PacketType::Disconnect)
        } else {
            None
        };

        handle.closing.store(true, Ordering::Relaxed);
        self.sink.close(handle.id);
        DispatchResult::failed(reason_code, message, response)
    }

    fn stream_failure(&self, handle: &ConnectionHandle, err: &Error) -> DispatchResult {
        let reason_code = match err {
            Error::Protocol(p) => p.reason_code(),
            _ => reason::UNSPECIFIED_ERROR,
        };
        self.fail_connection(handle, reason_code, format!("decode failed: {err}"))
    }

    /// Distribute a publish to every matching subscriber. Returns how many
    /// deliveries were made.
    pub(crate) fn fanout(&self, publish: &Publish, publisher: Option<ConnectionId>) -> usize {
        let connections = self.connections.read();
        let recipients = self.subscriptions.write().route(
            &publish.topic,
            publisher,
            |conn| connections.get(&conn).map(|h| h.is_live()).unwrap_or(false),
            &mut rand::thread_rng(),
        );

        let mut delivered = 0;
        for subscriber in recipients {
            let Some(target) = connections.get(&subscriber.connection) else {
                continue;
            };

            let qos = publish.qos.min(subscriber.qos);
            let mut out = Publish {
                dup: false,
                qos,
                retain: if subscriber.retain_as_published {
                    publish.retain
                } else {
                    false
                },
                topic: publish.topic.clone(),
                packet_id: (qos != QoS::AtMostOnce).then(|| target.allocate_packet_id()),
                properties: None,
                payload: publish.payload.clone(),
            };

            if target.is_v5() {
                let mut props = publish.properties.clone().unwrap_or_default();
                // Topic aliases are connection-scoped; never forwarded.
                props.topic_alias = None;
                props.subscription_identifiers =
                    subscriber.subscription_id.into_iter().collect();
                out.properties = Some(props);
            }

            self.send_packet(target, &Packet::Publish(out));
            delivered += 1;
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use mqrelay_core::packet::{
        decode_packet, Ack, Connect, Subscribe, SubscriptionOptions, Unsubscribe,
    };
    use parking_lot::Mutex;

    use crate::auth::StaticCredentials;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(ConnectionId, Bytes)>>,
        closed: Mutex<Vec<ConnectionId>>,
    }

    impl PacketSink for RecordingSink {
        fn send(&self, connection: ConnectionId, bytes: Bytes) {
            self.sent.lock().push((connection, bytes));
        }

        fn close(&self, connection: ConnectionId) {
            self.closed.lock().push(connection);
        }
    }

    impl RecordingSink {
        /// Take and decode everything sent to `connection` so far.
        fn drain(&self, connection: ConnectionId, version: u8) -> Vec<Packet> {
            let mut buf = Vec::new();
            self.sent.lock().retain(|(conn, bytes)| {
                if *conn == connection {
                    buf.extend_from_slice(bytes);
                    false
                } else {
                    true
                }
            });

            let mut packets = Vec::new();
            let mut pos = 0;
            while pos < buf.len() {
                match decode_packet(&buf[pos..], version, 0).unwrap() {
                    Some((packet, consumed)) => {
                        packets.push(packet);
                        pos += consumed;
                    }
                    None => panic!("truncated packet in sink"),
                }
            }
            packets
        }

        fn is_closed(&self, connection: ConnectionId) -> bool {
            self.closed.lock().contains(&connection)
        }
    }

    fn setup() -> (Broker, Arc<RecordingSink>) {
        let config = BrokerConfig::default();
        let sink = Arc::new(RecordingSink::default());
        let credentials = Arc::new(StaticCredentials::new(&config.auth));
        (Broker::new(config, sink.clone(), credentials), sink)
    }

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000)
    }

    fn send(broker: &Broker, id: ConnectionId, packet: &Packet, version: u8) -> Vec<DispatchResult> {
        let mut buf = Vec::new();
        encode_packet(packet, version, &mut buf).unwrap();
        broker.data_received(id, &buf)
    }

    fn connect(
        broker: &Broker,
        sink: &RecordingSink,
        client_id: &str,
        version: u8,
    ) -> ConnectionId {
        let id = broker.connection_opened(addr());
        let results = send(
            broker,
            id,
            &Packet::Connect(Connect {
                protocol_version: version,
                clean_session: true,
                keep_alive: 60,
                client_id: client_id.to_string(),
                will: None,
                username: None,
                password: None,
                properties: None,
            }),
            version,
        );
        assert!(results[0].success);
        match sink.drain(id, version).as_slice() {
            [Packet::Connack(connack)] => {
                assert_eq!(connack.reason_code, reason::SUCCESS);
                assert!(!connack.session_present);
            }
            other => panic!("expected CONNACK, got {other:?}"),
        }
        id
    }

    fn subscribe(
        broker: &Broker,
        sink: &RecordingSink,
        id: ConnectionId,
        filter: &str,
        qos: QoS,
        version: u8,
    ) {
        let results = send(
            broker,
            id,
            &Packet::Subscribe(Subscribe {
                packet_id: 10,
                properties: None,
                filters: vec![(filter.to_string(), SubscriptionOptions::with_qos(qos))],
            }),
            version,
        );
        assert!(results[0].success);
        match sink.drain(id, version).as_slice() {
            [Packet::Suback(suback)] => assert_eq!(suback.reason_codes, vec![qos as u8]),
            other => panic!("expected SUBACK, got {other:?}"),
        }
    }

    fn publish(topic: &str, qos: QoS, retain: bool, packet_id: Option<u16>) -> Publish {
        Publish {
            dup: false,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id,
            properties: None,
            payload: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn test_connect_and_connack() {
        let (broker, sink) = setup();
        connect(&broker, &sink, "alpha", 4);
        connect(&broker, &sink, "beta", 5);
    }

    #[test]
    fn test_v5_empty_client_id_gets_assignment() {
        let (broker, sink) = setup();
        let id = broker.connection_opened(addr());
        send(
            &broker,
            id,
            &Packet::Connect(Connect {
                protocol_version: 5,
                clean_session: true,
                keep_alive: 0,
                client_id: String::new(),
                will: None,
                username: None,
                password: None,
                properties: None,
            }),
            5,
        );
        match sink.drain(id, 5).as_slice() {
            [Packet::Connack(connack)] => {
                let props = connack.properties.as_ref().unwrap();
                assert!(props.assigned_client_identifier.is_some());
                // Keep-alive 0 is replaced by the server default.
                assert_eq!(props.server_keep_alive, Some(60));
            }
            other => panic!("expected CONNACK, got {other:?}"),
        }
    }

    #[test]
    fn test_first_packet_must_be_connect() {
        let (broker, sink) = setup();
        let id = broker.connection_opened(addr());
        let results = send(&broker, id, &Packet::Pingreq, 4);
        assert!(!results[0].success);
        assert!(sink.is_closed(id));
    }

    #[test]
    fn test_publish_delivery_and_puback() {
        let (broker, sink) = setup();
        let subscriber = connect(&broker, &sink, "sub", 4);
        let publisher = connect(&broker, &sink, "pub", 4);
        subscribe(&broker, &sink, subscriber, "sensors/#", QoS::AtLeastOnce, 4);

        send(
            &broker,
            publisher,
            &Packet::Publish(publish("sensors/temp", QoS::AtLeastOnce, false, Some(7))),
            4,
        );

        match sink.drain(publisher, 4).as_slice() {
            [Packet::Puback(ack)] => assert_eq!(ack.packet_id, 7),
            other => panic!("expected PUBACK, got {other:?}"),
        }
        match sink.drain(subscriber, 4).as_slice() {
            [Packet::Publish(received)] => {
                assert_eq!(received.topic, "sensors/temp");
                assert_eq!(received.qos, QoS::AtLeastOnce);
                assert!(received.packet_id.is_some());
                assert!(!received.retain);
            }
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    #[test]
    fn test_no_echo_to_publisher() {
        let (broker, sink) = setup();
        let id = connect(&broker, &sink, "solo", 5);
        subscribe(&broker, &sink, id, "a/b", QoS::AtLeastOnce, 5);

        send(
            &broker,
            id,
            &Packet::Publish(publish("a/b", QoS::AtLeastOnce, false, Some(3))),
            5,
        );

        match sink.drain(id, 5).as_slice() {
            [Packet::Puback(ack)] => {
                assert_eq!(ack.reason_code, reason::NO_MATCHING_SUBSCRIBERS);
            }
            other => panic!("expected lone PUBACK, got {other:?}"),
        }
    }

    #[test]
    fn test_qos2_exchange() {
        let (broker, sink) = setup();
        let id = connect(&broker, &sink, "q2", 4);

        send(
            &broker,
            id,
            &Packet::Publish(publish("a/b", QoS::ExactlyOnce, false, Some(9))),
            4,
        );
        match sink.drain(id, 4).as_slice() {
            [Packet::Pubrec(ack)] => assert_eq!(ack.packet_id, 9),
            other => panic!("expected PUBREC, got {other:?}"),
        }

        send(&broker, id, &Packet::Pubrel(Ack::new(9)), 4);
        match sink.drain(id, 4).as_slice() {
            [Packet::Pubcomp(ack)] => assert_eq!(ack.packet_id, 9),
            other => panic!("expected PUBCOMP, got {other:?}"),
        }
    }

    #[test]
    fn test_retained_replay_after_suback() {
        let (broker, sink) = setup();
        let publisher = connect(&broker, &sink, "pub", 4);
        send(
            &broker,
            publisher,
            &Packet::Publish(publish("status/up", QoS::AtLeastOnce, true, Some(1))),
            4,
        );
        sink.drain(publisher, 4);

        let subscriber = connect(&broker, &sink, "sub", 4);
        send(
            &broker,
            subscriber,
            &Packet::Subscribe(Subscribe {
                packet_id: 2,
                properties: None,
                filters: vec![(
                    "status/#".to_string(),
                    SubscriptionOptions::with_qos(QoS::AtLeastOnce),
                )],
            }),
            4,
        );

        match sink.drain(subscriber, 4).as_slice() {
            [Packet::Suback(_), Packet::Publish(retained)] => {
                assert_eq!(retained.topic, "status/up");
                assert!(retained.retain);
            }
            other => panic!("expected SUBACK then retained PUBLISH, got {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (broker, sink) = setup();
        let subscriber = connect(&broker, &sink, "sub", 5);
        let publisher = connect(&broker, &sink, "pub", 5);
        subscribe(&broker, &sink, subscriber, "a/b", QoS::AtMostOnce, 5);

        send(
            &broker,
            subscriber,
            &Packet::Unsubscribe(Unsubscribe {
                packet_id: 4,
                properties: None,
                filters: vec!["a/b".to_string(), "never/was".to_string()],
            }),
            5,
        );
        match sink.drain(subscriber, 5).as_slice() {
            [Packet::Unsuback(unsuback)] => {
                assert_eq!(
                    unsuback.reason_codes,
                    vec![reason::SUCCESS, reason::NO_SUBSCRIPTION_EXISTED]
                );
            }
            other => panic!("expected UNSUBACK, got {other:?}"),
        }

        send(
            &broker,
            publisher,
            &Packet::Publish(publish("a/b", QoS::AtMostOnce, false, None)),
            5,
        );
        assert!(sink.drain(subscriber, 5).is_empty());
    }

    #[test]
    fn test_invalid_filter_rejected_in_suback() {
        let (broker, sink) = setup();
        let id = connect(&broker, &sink, "bad", 5);

        send(
            &broker,
            id,
            &Packet::Subscribe(Subscribe {
                packet_id: 3,
                properties: None,
                filters: vec![(
                    "a/#/b".to_string(),
                    SubscriptionOptions::with_qos(QoS::AtMostOnce),
                )],
            }),
            5,
        );
        match sink.drain(id, 5).as_slice() {
            [Packet::Suback(suback)] => {
                assert_eq!(suback.reason_codes, vec![reason::TOPIC_NAME_INVALID]);
            }
            other => panic!("expected SUBACK, got {other:?}"),
        }
    }

    #[test]
    fn test_session_takeover() {
        let (broker, sink) = setup();
        let first = connect(&broker, &sink, "dup", 5);
        let second = connect(&broker, &sink, "dup", 5);

        assert!(sink.is_closed(first));
        assert!(!sink.is_closed(second));
        match sink.drain(first, 5).as_slice() {
            [Packet::Disconnect(d)] => assert_eq!(d.reason_code, reason::SESSION_TAKEN_OVER),
            other => panic!("expected DISCONNECT, got {other:?}"),
        }
    }

    #[test]
    fn test_will_published_on_abnormal_close() {
        let (broker, sink) = setup();
        let watcher = connect(&broker, &sink, "watcher", 4);
        subscribe(&broker, &sink, watcher, "lwt/#", QoS::AtMostOnce, 4);

        let doomed = broker.connection_opened(addr());
        send(
            &broker,
            doomed,
            &Packet::Connect(Connect {
                protocol_version: 4,
                clean_session: true,
                keep_alive: 60,
                client_id: "doomed".to_string(),
                will: Some(mqrelay_core::packet::Will {
                    topic: "lwt/doomed".to_string(),
                    payload: Bytes::from_static(b"gone"),
                    qos: QoS::AtMostOnce,
                    retain: false,
                    properties: None,
                }),
                username: None,
                password: None,
                properties: None,
            }),
            4,
        );
        sink.drain(doomed, 4);

        broker.connection_closed(doomed);
        match sink.drain(watcher, 4).as_slice() {
            [Packet::Publish(will)] => {
                assert_eq!(will.topic, "lwt/doomed");
                assert_eq!(&will.payload[..], b"gone");
            }
            other => panic!("expected will PUBLISH, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_disconnect_discards_will() {
        let (broker, sink) = setup();
        let watcher = connect(&broker, &sink, "watcher", 4);
        subscribe(&broker, &sink, watcher, "lwt/#", QoS::AtMostOnce, 4);

        let leaver = broker.connection_opened(addr());
        send(
            &broker,
            leaver,
            &Packet::Connect(Connect {
                protocol_version: 4,
                clean_session: true,
                keep_alive: 60,
                client_id: "leaver".to_string(),
                will: Some(mqrelay_core::packet::Will {
                    topic: "lwt/leaver".to_string(),
                    payload: Bytes::from_static(b"gone"),
                    qos: QoS::AtMostOnce,
                    retain: false,
                    properties: None,
                }),
                username: None,
                password: None,
                properties: None,
            }),
            4,
        );
        sink.drain(leaver, 4);

        send(&broker, leaver, &Packet::Disconnect(Disconnect::normal()), 4);
        broker.connection_closed(leaver);
        assert!(sink.drain(watcher, 4).is_empty());
    }

    #[test]
    fn test_keepalive_sweep() {
        let (broker, sink) = setup();
        let id = broker.connection_opened(addr());
        send(
            &broker,
            id,
            &Packet::Connect(Connect {
                protocol_version: 4,
                clean_session: true,
                keep_alive: 1,
                client_id: "sleepy".to_string(),
                will: None,
                username: None,
                password: None,
                properties: None,
            }),
            4,
        );
        sink.drain(id, 4);

        broker.sweep_keepalive(Instant::now() + Duration::from_secs(1));
        assert!(!sink.is_closed(id));

        broker.sweep_keepalive(Instant::now() + Duration::from_secs(3));
        assert!(sink.is_closed(id));
    }

    #[test]
    fn test_sweep_reaps_connection_that_never_connects() {
        let (broker, sink) = setup();
        let id = broker.connection_opened(addr());

        // Within the default keep-alive grace the slot stays open.
        broker.sweep_keepalive(Instant::now() + Duration::from_secs(1));
        assert!(!sink.is_closed(id));

        let grace = u64::from(broker.config.session.default_keep_alive);
        broker.sweep_keepalive(Instant::now() + Duration::from_secs(grace + 1));
        assert!(sink.is_closed(id));
        // No DISCONNECT for a peer whose protocol level was never negotiated.
        assert!(sink.drain(id, 4).is_empty());
    }

    #[test]
    fn test_malformed_stream_disconnects() {
        let (broker, sink) = setup();
        let id = connect(&broker, &sink, "garbled", 5);

        // Packet type 0 is invalid.
        let results = broker.data_received(id, &[0x00, 0x00]);
        assert!(!results[0].success);
        assert!(sink.is_closed(id));
        match sink.drain(id, 5).as_slice() {
            [Packet::Disconnect(d)] => assert!(d.reason_code >= 0x80),
            other => panic!("expected DISCONNECT, got {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_notifies_v5_clients() {
        let (broker, sink) = setup();
        let old = connect(&broker, &sink, "old", 4);
        let new = connect(&broker, &sink, "new", 5);

        broker.shutdown();
        assert!(sink.is_closed(old));
        assert!(sink.is_closed(new));
        assert!(sink.drain(old, 4).is_empty());
        match sink.drain(new, 5).as_slice() {
            [Packet::Disconnect(d)] => assert_eq!(d.reason_code, reason::SERVER_SHUTTING_DOWN),
            other => panic!("expected DISCONNECT, got {other:?}"),
        }

        let late = broker.connection_opened(addr());
        assert!(sink.is_closed(late));
    }
}
