//! PUBLISH processing: policy checks, retained-store update, fan-out and
//! the QoS acknowledgement.

use std::sync::Arc;
use std::time::Instant;

use mqrelay_core::packet::{reason, Ack, Packet, PacketType, Publish, QoS};
use mqrelay_core::topic;

use crate::broker::Broker;
use crate::connection::{ConnectionHandle, DispatchResult};

pub(crate) fn handle(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    publish: Publish,
) -> DispatchResult {
    if let Err(err) = topic::validate_name(&publish.topic).and_then(|()| {
        topic::check_limits(
            &publish.topic,
            broker.config.limits.max_topic_length,
            broker.config.limits.max_topic_levels,
        )
    }) {
        return broker.fail_connection(
            handle,
            reason::TOPIC_NAME_INVALID,
            format!("invalid publish topic: {err}"),
        );
    }

    if publish.qos as u8 > broker.config.mqtt.max_qos {
        return broker.fail_connection(
            handle,
            reason::QOS_NOT_SUPPORTED,
            format!("QoS {} exceeds the maximum", publish.qos as u8),
        );
    }

    if publish.retain && !broker.config.mqtt.retain_available {
        return broker.fail_connection(
            handle,
            reason::RETAIN_NOT_SUPPORTED,
            "RETAIN flag set but retained messages are disabled",
        );
    }

    // No Topic Alias Maximum is advertised, so the client's maximum is 0.
    if publish
        .properties
        .as_ref()
        .and_then(|p| p.topic_alias)
        .is_some()
    {
        return broker.fail_connection(
            handle,
            reason::TOPIC_ALIAS_INVALID,
            "topic aliases are not supported",
        );
    }

    if publish.retain {
        broker.retained.write().store(&publish, Instant::now());
    }

    let delivered = broker.fanout(&publish, Some(handle.id));
    log::trace!(
        "{}: publish to '{}' delivered to {delivered} subscribers",
        handle.id,
        publish.topic
    );

    // v5 peers learn when a publish matched nobody; pre-v5 acks have no
    // reason code to carry it.
    let ack_reason = if delivered == 0 && handle.is_v5() {
        reason::NO_MATCHING_SUBSCRIBERS
    } else {
        reason::SUCCESS
    };

    let response = match (publish.qos, publish.packet_id) {
        (QoS::AtLeastOnce, Some(packet_id)) => {
            broker.send_packet(handle, &Packet::Puback(Ack::with_reason(packet_id, ack_reason)));
            Some(PacketType::Puback)
        }
        (QoS::ExactlyOnce, Some(packet_id)) => {
            broker.send_packet(handle, &Packet::Pubrec(Ack::with_reason(packet_id, ack_reason)));
            Some(PacketType::Pubrec)
        }
        _ => None,
    };

    DispatchResult::ok(response)
}
