//! Retained message store.
//!
//! One entry per topic, overwritten by each new retained publish. An entry
//! expires at `stored_at + interval` (the publish's own v5 Message Expiry
//! Interval when present, the configured default otherwise) and additionally
//! wears out after a bounded number of replays: QoS 0 and QoS 2 entries are
//! single-shot, QoS 1 entries survive up to the configured delivery cap.
//! Expired and worn-out entries are purged lazily during the next scan.

use std::time::{Duration, Instant};

use ahash::AHashMap;
use mqrelay_core::packet::{Publish, QoS};

#[derive(Debug, Clone)]
struct RetainedEntry {
    publish: Publish,
    expires_at: Instant,
    deliveries: u32,
}

#[derive(Debug)]
pub struct RetainedStore {
    entries: AHashMap<String, RetainedEntry>,
    expire_interval: Duration,
    max_deliveries: u32,
}

impl RetainedStore {
    pub fn new(expire_interval: Duration, max_deliveries: u32) -> Self {
        Self {
            entries: AHashMap::new(),
            expire_interval,
            max_deliveries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store or overwrite the entry for `publish.topic`. An empty payload
    /// deletes the entry instead.
    pub fn store(&mut self, publish: &Publish, now: Instant) {
        if publish.payload.is_empty() {
            if self.entries.remove(&publish.topic).is_some() {
                log::debug!("retained message for '{}' cleared", publish.topic);
            }
            return;
        }

        let interval = publish
            .properties
            .as_ref()
            .and_then(|p| p.message_expiry_interval)
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(self.expire_interval);

        let mut stored = publish.clone();
        stored.dup = false;
        stored.retain = true;
        stored.packet_id = None;

        self.entries.insert(
            publish.topic.clone(),
            RetainedEntry {
                publish: stored,
                expires_at: now + interval,
                deliveries: 0,
            },
        );
    }

    /// Collect the retained messages to replay for a newly-accepted
    /// subscription.
    ///
    /// An entry matches when its topic matches `filter` and its QoS does not
    /// exceed `max_qos`. Each matching entry is returned once, then either
    /// removed (QoS 0/2, or a QoS 1 entry at its delivery cap) or has its
    /// delivery counter bumped. The same walk purges entries past their
    /// expiry or cap whether or not they match.
    pub fn collect(&mut self, filter: &str, max_qos: QoS, now: Instant) -> Vec<Publish> {
        let mut replay = Vec::new();

        self.entries.retain(|topic, entry| {
            if entry.expires_at <= now || entry.deliveries > self.max_deliveries {
                log::debug!("retained message for '{}' purged", topic);
                return false;
            }

            if !(mqrelay_core::topic::matches(filter, topic) && entry.publish.qos <= max_qos) {
                return true;
            }

            replay.push(entry.publish.clone());

            if entry.publish.qos != QoS::AtLeastOnce || entry.deliveries >= self.max_deliveries {
                return false;
            }
            entry.deliveries += 1;
            true
        });

        replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mqrelay_core::properties::PublishProperties;

    fn retained(topic: &str, qos: QoS, payload: &'static [u8]) -> Publish {
        Publish {
            dup: false,
            qos,
            retain: true,
            topic: topic.into(),
            packet_id: if qos == QoS::AtMostOnce { None } else { Some(1) },
            properties: None,
            payload: Bytes::from_static(payload),
        }
    }

    fn store() -> RetainedStore {
        RetainedStore::new(Duration::from_secs(3600), 2)
    }

    #[test]
    fn test_store_and_replay() {
        let mut s = store();
        let now = Instant::now();
        s.store(&retained("a/b", QoS::AtLeastOnce, b"hi"), now);

        let out = s.collect("a/#", QoS::AtLeastOnce, now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, "a/b");
        assert!(out[0].retain);
        assert!(out[0].packet_id.is_none());
    }

    #[test]
    fn test_empty_payload_deletes() {
        let mut s = store();
        let now = Instant::now();
        s.store(&retained("a/b", QoS::AtMostOnce, b"hi"), now);
        assert_eq!(s.len(), 1);

        s.store(&retained("a/b", QoS::AtMostOnce, b""), now);
        assert!(s.is_empty());
        assert!(s.collect("a/b", QoS::ExactlyOnce, now).is_empty());
    }

    #[test]
    fn test_qos0_entry_is_single_shot() {
        let mut s = store();
        let now = Instant::now();
        s.store(&retained("a/b", QoS::AtMostOnce, b"hi"), now);

        assert_eq!(s.collect("a/b", QoS::ExactlyOnce, now).len(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn test_qos1_entry_wears_out_at_cap() {
        let mut s = store();
        let now = Instant::now();
        s.store(&retained("a/b", QoS::AtLeastOnce, b"hi"), now);

        // Cap of 2: deliveries at counter 0, 1 and 2, then gone.
        assert_eq!(s.collect("a/b", QoS::AtLeastOnce, now).len(), 1);
        assert_eq!(s.collect("a/b", QoS::AtLeastOnce, now).len(), 1);
        assert_eq!(s.collect("a/b", QoS::AtLeastOnce, now).len(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn test_qos_filtering() {
        let mut s = store();
        let now = Instant::now();
        s.store(&retained("a/b", QoS::ExactlyOnce, b"hi"), now);

        // Entry QoS above the subscription's requested QoS: not replayed,
        // not removed.
        assert!(s.collect("a/b", QoS::AtMostOnce, now).is_empty());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_expiry_purged_during_scan() {
        let mut s = RetainedStore::new(Duration::from_secs(10), 2);
        let now = Instant::now();
        s.store(&retained("old/topic", QoS::AtLeastOnce, b"x"), now);
        s.store(&retained("fresh/topic", QoS::AtLeastOnce, b"y"), now + Duration::from_secs(60));

        // "old/topic" is past expiry; the scan for an unrelated filter
        // purges it anyway.
        let later = now + Duration::from_secs(30);
        assert!(s.collect("nomatch/#", QoS::ExactlyOnce, later).is_empty());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_message_expiry_property_overrides_default() {
        let mut s = store();
        let now = Instant::now();
        let mut publish = retained("a/b", QoS::AtLeastOnce, b"hi");
        publish.properties = Some(PublishProperties {
            message_expiry_interval: Some(5),
            ..Default::default()
        });
        s.store(&publish, now);

        let later = now + Duration::from_secs(6);
        assert!(s.collect("a/b", QoS::AtLeastOnce, later).is_empty());
        assert!(s.is_empty());
    }
}
