//! Per-connection session state.

use mqrelay_core::packet::SubscriptionOptions;

/// One accepted subscription, stored exactly as the client sent it
/// (`$share` prefix included).
#[derive(Debug, Clone)]
pub struct StoredSubscription {
    pub filter: String,
    pub options: SubscriptionOptions,
    pub subscription_id: Option<u32>,
}

/// Session state for one connected client: the CONNECT snapshot plus its
/// active subscriptions in insertion order.
#[derive(Debug, Default)]
pub struct Session {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    subscriptions: Vec<StoredSubscription>,
}

impl Session {
    pub fn new(client_id: String, clean_session: bool, keep_alive: u16) -> Self {
        Self {
            client_id,
            clean_session,
            keep_alive,
            subscriptions: Vec::new(),
        }
    }

    /// Add a subscription, or update an identical filter string in place.
    /// Returns true when the filter was not previously subscribed.
    pub fn upsert(
        &mut self,
        filter: &str,
        options: SubscriptionOptions,
        subscription_id: Option<u32>,
    ) -> bool {
        // Duplicate detection is exact string comparison, not wildcard
        // matching: "a/+" and "a/b" are distinct subscriptions.
        if let Some(existing) = self.subscriptions.iter_mut().find(|s| s.filter == filter) {
            existing.options = options;
            existing.subscription_id = subscription_id;
            return false;
        }
        self.subscriptions.push(StoredSubscription {
            filter: filter.to_string(),
            options,
            subscription_id,
        });
        true
    }

    /// Remove by exact filter string. Returns true if it existed.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.filter != filter);
        self.subscriptions.len() != before
    }

    pub fn subscriptions(&self) -> &[StoredSubscription] {
        &self.subscriptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqrelay_core::packet::QoS;

    #[test]
    fn test_upsert_is_idempotent() {
        let mut session = Session::new("c1".into(), true, 60);
        assert!(session.upsert("a/b", SubscriptionOptions::with_qos(QoS::AtMostOnce), None));
        assert!(!session.upsert("a/b", SubscriptionOptions::with_qos(QoS::AtLeastOnce), None));
        assert_eq!(session.subscriptions().len(), 1);
        assert_eq!(session.subscriptions()[0].options.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_exact_match_removal() {
        let mut session = Session::new("c1".into(), true, 60);
        session.upsert("a/+", SubscriptionOptions::default(), None);
        session.upsert("a/b", SubscriptionOptions::default(), None);

        // Exact string comparison: removing "a/b" must not touch "a/+".
        assert!(session.remove("a/b"));
        assert!(!session.remove("a/b"));
        assert_eq!(session.subscriptions().len(), 1);
        assert_eq!(session.subscriptions()[0].filter, "a/+");
    }
}
