//! CONNECT processing: authentication, client identity, session takeover
//! and the CONNACK response.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mqrelay_core::packet::{reason, Connack, Connect, Disconnect, Packet, PacketType};
use mqrelay_core::properties::ConnackProperties;
use mqrelay_core::topic;

use crate::auth;
use crate::broker::Broker;
use crate::connection::{ConnState, ConnectionHandle, DispatchResult};
use crate::session::Session;

pub(crate) fn handle(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    state: &mut ConnState,
    connect: Connect,
) -> DispatchResult {
    if handle.connected.load(Ordering::Relaxed) {
        // [MQTT-3.1.0-2] a second CONNECT is a protocol violation.
        return broker.fail_connection(handle, reason::PROTOCOL_ERROR, "duplicate CONNECT");
    }

    // From here on every response is encoded at the client's level.
    handle
        .version
        .store(connect.protocol_version, Ordering::Relaxed);
    let is_v5 = connect.protocol_version == 5;

    let auth_code = auth::authenticate(
        broker.credentials.as_ref(),
        broker.config.auth.enabled,
        broker.config.auth.allow_anonymous,
        connect.username.as_deref(),
        connect.password.as_deref(),
        handle.remote_addr.ip(),
    );
    if auth_code != reason::SUCCESS {
        return refuse(broker, handle, auth_code, "authentication failed");
    }

    // Validate the will against the same policy a live PUBLISH would face.
    if let Some(will) = &connect.will {
        if topic::validate_name(&will.topic).is_err()
            || topic::check_limits(
                &will.topic,
                broker.config.limits.max_topic_length,
                broker.config.limits.max_topic_levels,
            )
            .is_err()
        {
            return refuse(broker, handle, reason::TOPIC_NAME_INVALID, "invalid will topic");
        }
        if will.qos as u8 > broker.config.mqtt.max_qos {
            return refuse(broker, handle, reason::QOS_NOT_SUPPORTED, "will QoS too high");
        }
        if will.retain && !broker.config.mqtt.retain_available {
            return refuse(
                broker,
                handle,
                reason::RETAIN_NOT_SUPPORTED,
                "will retain not available",
            );
        }
    }

    let mut assigned_client_id = None;
    let client_id = if connect.client_id.is_empty() {
        // Pre-v5 clients may only omit the id with a clean session
        // [MQTT-3.1.3-7]; v5 clients always get one assigned.
        if !is_v5 && !connect.clean_session {
            return refuse(
                broker,
                handle,
                reason::CLIENT_IDENTIFIER_NOT_VALID,
                "empty client id without clean session",
            );
        }
        let generated = format!("mqrelay-{}", handle.id.0);
        if is_v5 {
            assigned_client_id = Some(generated.clone());
        }
        generated
    } else {
        connect.client_id.clone()
    };

    take_over_existing(broker, handle, &client_id);

    let requested_keep_alive = connect.keep_alive;
    let effective_keep_alive = if requested_keep_alive == 0 {
        broker.config.session.default_keep_alive
    } else {
        requested_keep_alive.min(broker.config.session.max_keep_alive)
    };

    state.session = Session::new(client_id.clone(), connect.clean_session, effective_keep_alive);
    state.will = connect.will;

    handle
        .keep_alive
        .store(effective_keep_alive, Ordering::Relaxed);
    handle.connected.store(true, Ordering::Relaxed);

    log::info!(
        "{}: client '{client_id}' connected (level {}, keep-alive {effective_keep_alive}s)",
        handle.id,
        connect.protocol_version
    );

    let properties = is_v5.then(|| {
        let mqtt = &broker.config.mqtt;
        ConnackProperties {
            maximum_qos: (mqtt.max_qos < 2).then_some(mqtt.max_qos),
            retain_available: (!mqtt.retain_available).then_some(false),
            maximum_packet_size: Some(broker.config.limits.max_packet_size),
            assigned_client_identifier: assigned_client_id,
            // Topic Alias Maximum is omitted: aliases are not supported.
            wildcard_subscription_available: (!mqtt.wildcard_subscriptions).then_some(false),
            subscription_identifiers_available: (!mqtt.subscription_identifiers).then_some(false),
            shared_subscription_available: (!mqtt.shared_subscriptions).then_some(false),
            server_keep_alive: (effective_keep_alive != requested_keep_alive)
                .then_some(effective_keep_alive),
            ..Default::default()
        }
    });

    broker.send_packet(
        handle,
        &Packet::Connack(Connack {
            // Sessions do not survive the connection; always a fresh one.
            session_present: false,
            reason_code: reason::SUCCESS,
            properties,
        }),
    );
    DispatchResult::ok(Some(PacketType::Connack))
}

/// Refuse the connection with a CONNACK carrying `reason_code`, then close.
fn refuse(
    broker: &Broker,
    handle: &ConnectionHandle,
    reason_code: u8,
    message: &str,
) -> DispatchResult {
    log::info!("{}: CONNECT refused: {message} ({reason_code:#04x})", handle.id);
    broker.send_packet(
        handle,
        &Packet::Connack(Connack {
            session_present: false,
            reason_code,
            properties: None,
        }),
    );
    handle.closing.store(true, Ordering::Relaxed);
    broker.sink.close(handle.id);
    DispatchResult::failed(reason_code, message, Some(PacketType::Connack))
}

/// Claim `client_id` for this connection, disconnecting any previous holder
/// [MQTT-3.1.4-2]. The old connection's will (if armed) is published when
/// the transport reports its close.
fn take_over_existing(broker: &Broker, handle: &ConnectionHandle, client_id: &str) {
    let previous = broker
        .client_ids
        .write()
        .insert(client_id.to_string(), handle.id);
    let Some(previous) = previous.filter(|p| *p != handle.id) else {
        return;
    };
    let Some(old) = broker.connections.read().get(&previous).cloned() else {
        return;
    };

    log::info!(
        "{}: session takeover of client '{client_id}' from {previous}",
        handle.id
    );
    if old.is_v5() {
        broker.send_packet(
            &old,
            &Packet::Disconnect(Disconnect::with_reason(reason::SESSION_TAKEN_OVER)),
        );
    }
    old.closing.store(true, Ordering::Relaxed);
    broker.sink.close(previous);
}
