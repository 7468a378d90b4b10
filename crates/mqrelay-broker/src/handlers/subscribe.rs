//! SUBSCRIBE and UNSUBSCRIBE processing, including retained replay.

use std::sync::Arc;
use std::time::Instant;

use mqrelay_core::packet::{
    reason, Packet, PacketType, Publish, QoS, RetainHandling, Suback, Subscribe,
    SubscriptionOptions, Unsuback, Unsubscribe,
};
use mqrelay_core::topic;

use crate::broker::Broker;
use crate::connection::{ConnState, ConnectionHandle, DispatchResult};
use crate::subscription::Subscriber;

/// One accepted filter, held until the SUBACK is out so retained replay
/// follows it.
struct Accepted {
    /// Filter with any `$share/<group>/` prefix stripped.
    inner: String,
    shared: bool,
    granted: QoS,
    replay: bool,
    subscription_id: Option<u32>,
}

pub(crate) fn handle_subscribe(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    state: &mut ConnState,
    subscribe: Subscribe,
) -> DispatchResult {
    let mqtt = &broker.config.mqtt;
    let subscription_id = subscribe
        .properties
        .as_ref()
        .and_then(|p| p.subscription_identifier);

    let mut reason_codes = Vec::with_capacity(subscribe.filters.len());
    let mut accepted = Vec::new();

    for (filter, options) in &subscribe.filters {
        let code = evaluate_filter(broker, filter, subscription_id.is_some());
        if code != reason::SUCCESS {
            log::debug!("{}: subscribe to '{filter}' rejected ({code:#04x})", handle.id);
            reason_codes.push(if handle.is_v5() { code } else { reason::FAILURE });
            continue;
        }

        let granted = options
            .qos
            .min(QoS::try_from(mqtt.max_qos).unwrap_or(QoS::ExactlyOnce));
        // Validated by evaluate_filter; a failure here cannot happen.
        let (group, inner) = topic::split_shared(filter).unwrap_or((None, filter.as_str()));

        let was_new = state.session.upsert(
            filter,
            SubscriptionOptions {
                qos: granted,
                ..*options
            },
            subscription_id,
        );
        broker.subscriptions.write().subscribe(
            inner,
            group,
            Subscriber {
                connection: handle.id,
                qos: granted,
                retain_as_published: options.retain_as_published,
                subscription_id,
            },
        );

        let replay = group.is_none()
            && match options.retain_handling {
                RetainHandling::SendAlways => true,
                RetainHandling::SendIfNew => was_new,
                RetainHandling::Never => false,
            };

        accepted.push(Accepted {
            inner: inner.to_string(),
            shared: group.is_some(),
            granted,
            replay,
            subscription_id,
        });
        reason_codes.push(granted as u8);
    }

    broker.send_packet(
        handle,
        &Packet::Suback(Suback {
            packet_id: subscribe.packet_id,
            properties: None,
            reason_codes,
        }),
    );

    // Retained replay happens after the SUBACK [MQTT-3.3.1-9 ordering].
    let now = Instant::now();
    for entry in accepted.iter().filter(|a| a.replay && !a.shared) {
        let matches = broker
            .retained
            .write()
            .collect(&entry.inner, entry.granted, now);
        for retained in matches {
            send_retained(broker, handle, retained, entry);
        }
    }

    DispatchResult::ok(Some(PacketType::Suback))
}

/// Policy and validity check for one requested filter; SUCCESS or the v5
/// reason code to report.
fn evaluate_filter(broker: &Broker, filter: &str, has_subscription_id: bool) -> u8 {
    let mqtt = &broker.config.mqtt;

    if topic::validate_filter(filter).is_err()
        || topic::check_limits(
            filter,
            broker.config.limits.max_topic_length,
            broker.config.limits.max_topic_levels,
        )
        .is_err()
    {
        return reason::TOPIC_NAME_INVALID;
    }
    let Ok((group, inner)) = topic::split_shared(filter) else {
        return reason::TOPIC_NAME_INVALID;
    };
    if group.is_some() && !mqtt.shared_subscriptions {
        return reason::SHARED_SUBSCRIPTIONS_NOT_SUPPORTED;
    }
    if topic::contains_wildcard(inner) && !mqtt.wildcard_subscriptions {
        return reason::WILDCARD_SUBSCRIPTIONS_NOT_SUPPORTED;
    }
    if has_subscription_id && !mqtt.subscription_identifiers {
        return reason::SUBSCRIPTION_IDENTIFIERS_NOT_SUPPORTED;
    }
    reason::SUCCESS
}

fn send_retained(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    mut retained: Publish,
    entry: &Accepted,
) {
    retained.qos = retained.qos.min(entry.granted);
    retained.retain = true;
    retained.packet_id = (retained.qos != QoS::AtMostOnce).then(|| handle.allocate_packet_id());

    if handle.is_v5() {
        let mut props = retained.properties.take().unwrap_or_default();
        props.topic_alias = None;
        props.subscription_identifiers = entry.subscription_id.into_iter().collect();
        retained.properties = Some(props);
    } else {
        retained.properties = None;
    }

    log::trace!(
        "{}: replaying retained message on '{}'",
        handle.id,
        retained.topic
    );
    broker.send_packet(handle, &Packet::Publish(retained));
}

pub(crate) fn handle_unsubscribe(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    state: &mut ConnState,
    unsubscribe: Unsubscribe,
) -> DispatchResult {
    let mut reason_codes = Vec::with_capacity(unsubscribe.filters.len());

    for filter in &unsubscribe.filters {
        let existed = state.session.remove(filter);
        if existed {
            if let Ok((group, inner)) = topic::split_shared(filter) {
                broker.subscriptions.write().unsubscribe(inner, group, handle.id);
            }
        }
        reason_codes.push(if existed {
            reason::SUCCESS
        } else {
            reason::NO_SUBSCRIPTION_EXISTED
        });
    }

    broker.send_packet(
        handle,
        &Packet::Unsuback(Unsuback {
            packet_id: unsubscribe.packet_id,
            properties: None,
            reason_codes,
        }),
    );
    DispatchResult::ok(Some(PacketType::Unsuback))
}
