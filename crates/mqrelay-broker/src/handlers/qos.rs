//! QoS 1/2 acknowledgement flows.
//!
//! The broker does not retransmit (deliveries ride the live connection or
//! are lost with it), so PUBACK and PUBCOMP are informational. PUBREC and
//! PUBREL still need their protocol responses to let the client's QoS 2
//! state machine complete.

use std::sync::Arc;

use mqrelay_core::packet::{Ack, Packet, PacketType};

use crate::broker::Broker;
use crate::connection::{ConnectionHandle, DispatchResult};

pub(crate) fn handle_puback(handle: &Arc<ConnectionHandle>, ack: Ack) -> DispatchResult {
    log::trace!("{}: PUBACK for packet {}", handle.id, ack.packet_id);
    DispatchResult::ok(None)
}

pub(crate) fn handle_pubrec(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    ack: Ack,
) -> DispatchResult {
    if ack.reason_code >= 0x80 {
        // The receiver rejected the publish; the exchange ends here.
        log::debug!(
            "{}: PUBREC for packet {} failed ({:#04x})",
            handle.id,
            ack.packet_id,
            ack.reason_code
        );
        return DispatchResult::ok(None);
    }
    broker.send_packet(handle, &Packet::Pubrel(Ack::new(ack.packet_id)));
    DispatchResult::ok(Some(PacketType::Pubrel))
}

pub(crate) fn handle_pubrel(
    broker: &Broker,
    handle: &Arc<ConnectionHandle>,
    ack: Ack,
) -> DispatchResult {
    broker.send_packet(handle, &Packet::Pubcomp(Ack::new(ack.packet_id)));
    DispatchResult::ok(Some(PacketType::Pubcomp))
}

pub(crate) fn handle_pubcomp(handle: &Arc<ConnectionHandle>, ack: Ack) -> DispatchResult {
    log::trace!("{}: PUBCOMP for packet {}", handle.id, ack.packet_id);
    DispatchResult::ok(None)
}
