//! Server-wide subscription index and publish routing.
//!
//! Filters are keyed by their string (with any `$share/<group>/` prefix
//! stripped; shared groups hang off the same entry). Routing walks every
//! entry, garbage-collecting members whose connections are gone and
//! entries that end up empty, then wildcard-matches the filter against the
//! concrete topic.

use ahash::AHashMap;
use mqrelay_core::packet::QoS;
use mqrelay_core::topic;
use rand::Rng;

use crate::connection::ConnectionId;

/// One subscribing connection within a filter entry. Only what routing and
/// delivery consult lives here; the full subscription options stay on the
/// session. No-local has no slot because the publisher exclusion below
/// already covers the only connection it could apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscriber {
    pub connection: ConnectionId,
    pub qos: QoS,
    pub retain_as_published: bool,
    pub subscription_id: Option<u32>,
}

#[derive(Debug, Default)]
struct FilterEntry {
    /// Ordinary subscribers.
    direct: Vec<Subscriber>,
    /// Shared-group name -> members.
    shared: AHashMap<String, Vec<Subscriber>>,
}

impl FilterEntry {
    fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.shared.is_empty()
    }
}

/// Topic index: filter string -> subscribers.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    entries: AHashMap<String, FilterEntry>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_count(&self) -> usize {
        self.entries.len()
    }

    /// Register `subscriber` under `filter` (already `$share`-stripped; the
    /// group, if any, comes separately). A resubscribe from the same
    /// connection updates the existing slot.
    pub fn subscribe(&mut self, filter: &str, group: Option<&str>, subscriber: Subscriber) {
        let entry = self.entries.entry(filter.to_string()).or_default();
        let list = match group {
            Some(group) => entry.shared.entry(group.to_string()).or_default(),
            None => &mut entry.direct,
        };

        if let Some(slot) = list
            .iter_mut()
            .find(|s| s.connection == subscriber.connection)
        {
            *slot = subscriber;
        } else {
            list.push(subscriber);
        }
    }

    /// Deregister a connection from a filter. Returns true if it was
    /// subscribed. Entries left empty are garbage-collected.
    pub fn unsubscribe(
        &mut self,
        filter: &str,
        group: Option<&str>,
        connection: ConnectionId,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(filter) else {
            return false;
        };

        let removed = match group {
            Some(group) => {
                let mut removed = false;
                let mut now_empty = false;
                if let Some(members) = entry.shared.get_mut(group) {
                    let before = members.len();
                    members.retain(|s| s.connection != connection);
                    removed = members.len() != before;
                    now_empty = members.is_empty();
                }
                if now_empty {
                    entry.shared.remove(group);
                }
                removed
            }
            None => {
                let before = entry.direct.len();
                entry.direct.retain(|s| s.connection != connection);
                entry.direct.len() != before
            }
        };

        if entry.is_empty() {
            self.entries.remove(filter);
        }
        removed
    }

    /// Drop every subscription held by `connection`.
    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.entries.retain(|_, entry| {
            entry.direct.retain(|s| s.connection != connection);
            entry.shared.retain(|_, members| {
                members.retain(|s| s.connection != connection);
                !members.is_empty()
            });
            !entry.is_empty()
        });
    }

    /// Collect the recipients for a publish on `topic`.
    ///
    /// Dead members (per `is_alive`) and entries emptied by the cleanup are
    /// removed during the walk. Ordinary matches exclude the publisher (no
    /// local echo, independent of the no-local option). Each shared group
    /// receives the message exactly once, to a uniformly random member,
    /// preferring members other than the publisher when the group has any.
    pub fn route<R: Rng>(
        &mut self,
        topic: &str,
        publisher: Option<ConnectionId>,
        is_alive: impl Fn(ConnectionId) -> bool,
        rng: &mut R,
    ) -> Vec<Subscriber> {
        let mut matched = Vec::new();

        self.entries.retain(|filter, entry| {
            entry.direct.retain(|s| is_alive(s.connection));
            entry.shared.retain(|_, members| {
                members.retain(|s| is_alive(s.connection));
                !members.is_empty()
            });
            if entry.is_empty() {
                return false;
            }

            if topic::matches(filter, topic) {
                for s in &entry.direct {
                    if Some(s.connection) != publisher {
                        matched.push(*s);
                    }
                }
                for members in entry.shared.values() {
                    let candidates: Vec<usize> = members
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| Some(s.connection) != publisher)
                        .map(|(i, _)| i)
                        .collect();
                    let pick = if candidates.is_empty() {
                        // Publisher is the group's only member.
                        rng.gen_range(0..members.len())
                    } else {
                        candidates[rng.gen_range(0..candidates.len())]
                    };
                    matched.push(members[pick]);
                }
            }
            true
        });

        matched
    }
}
