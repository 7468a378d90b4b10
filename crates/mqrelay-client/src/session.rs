//! In-flight QoS state for one connection.

use std::collections::{HashMap, HashSet};

use mqrelay_core::packet::Publish;

/// Where an outbound QoS 1/2 publish stands in its acknowledgment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundStage {
    /// QoS 1: waiting for PUBACK.
    AwaitingPuback,
    /// QoS 2: waiting for PUBREC.
    AwaitingPubrec,
    /// QoS 2: PUBREL sent, waiting for PUBCOMP.
    AwaitingPubcomp,
}

#[derive(Debug, Clone)]
pub struct PendingPublish {
    pub publish: Publish,
    pub stage: OutboundStage,
}

/// Tracks both directions of the QoS machinery:
/// - outbound publishes awaiting their acks, keyed by packet id, with send
///   order preserved so a reconnect resends them in order [MQTT-4.6.0-1];
/// - inbound QoS 2 packet ids for which PUBREC has gone out but PUBREL has
///   not yet arrived, so duplicate deliveries surface only one message.
#[derive(Debug, Default)]
pub struct Session {
    outbound: HashMap<u16, PendingPublish>,
    /// Packet ids in original send order.
    order: Vec<u16>,
    inbound_qos2: HashSet<u16>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_outbound(&mut self, packet_id: u16, publish: Publish, stage: OutboundStage) {
        if self
            .outbound
            .insert(packet_id, PendingPublish { publish, stage })
            .is_none()
        {
            self.order.push(packet_id);
        }
    }

    /// Snapshot of unacknowledged publishes in original send order, for
    /// redelivery after a non-clean-session reconnect.
    pub fn pending_in_order(&self) -> Vec<(u16, PendingPublish)> {
        self.order
            .iter()
            .filter_map(|id| self.outbound.get(id).map(|p| (*id, p.clone())))
            .collect()
    }

    pub fn outbound_stage(&self, packet_id: u16) -> Option<OutboundStage> {
        self.outbound.get(&packet_id).map(|p| p.stage)
    }

    /// Move a QoS 2 publish from PUBREC-wait to PUBCOMP-wait. Returns false
    /// when the id is unknown or not in the PUBREC-wait stage.
    pub fn mark_released(&mut self, packet_id: u16) -> bool {
        match self.outbound.get_mut(&packet_id) {
            Some(pending) if pending.stage == OutboundStage::AwaitingPubrec => {
                pending.stage = OutboundStage::AwaitingPubcomp;
                true
            }
            _ => false,
        }
    }

    /// Finish an outbound exchange, dropping its tracked publish.
    pub fn complete_outbound(&mut self, packet_id: u16) -> Option<PendingPublish> {
        let pending = self.outbound.remove(&packet_id);
        if pending.is_some() {
            self.order.retain(|id| *id != packet_id);
        }
        pending
    }

    /// Record an inbound QoS 2 delivery. Returns false if this packet id is
    /// already mid-flow (a duplicate that must not resurface).
    pub fn begin_inbound_qos2(&mut self, packet_id: u16) -> bool {
        self.inbound_qos2.insert(packet_id)
    }

    /// PUBREL arrived: the inbound QoS 2 flow for this id is done.
    pub fn finish_inbound_qos2(&mut self, packet_id: u16) -> bool {
        self.inbound_qos2.remove(&packet_id)
    }

    pub fn outbound_in_flight(&self) -> usize {
        self.outbound.len()
    }

    pub fn reset(&mut self) {
        self.outbound.clear();
        self.order.clear();
        self.inbound_qos2.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mqrelay_core::packet::QoS;

    fn publish(packet_id: u16, qos: QoS) -> Publish {
        Publish {
            dup: false,
            qos,
            retain: false,
            topic: "t".into(),
            packet_id: Some(packet_id),
            properties: None,
            payload: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn test_qos2_outbound_stages() {
        let mut session = Session::new();
        session.track_outbound(5, publish(5, QoS::ExactlyOnce), OutboundStage::AwaitingPubrec);

        assert!(session.mark_released(5));
        assert_eq!(session.outbound_stage(5), Some(OutboundStage::AwaitingPubcomp));
        // A second PUBREC for the same id must not restart the flow.
        assert!(!session.mark_released(5));

        assert!(session.complete_outbound(5).is_some());
        assert_eq!(session.outbound_in_flight(), 0);
    }

    #[test]
    fn test_pending_kept_in_send_order() {
        let mut session = Session::new();
        session.track_outbound(3, publish(3, QoS::AtLeastOnce), OutboundStage::AwaitingPuback);
        session.track_outbound(1, publish(1, QoS::AtLeastOnce), OutboundStage::AwaitingPuback);
        session.track_outbound(2, publish(2, QoS::AtLeastOnce), OutboundStage::AwaitingPuback);
        session.complete_outbound(1);

        let ids: Vec<u16> = session.pending_in_order().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_inbound_qos2_duplicate_detection() {
        let mut session = Session::new();
        assert!(session.begin_inbound_qos2(9));
        assert!(!session.begin_inbound_qos2(9));
        assert!(session.finish_inbound_qos2(9));
        assert!(session.begin_inbound_qos2(9));
    }
}
