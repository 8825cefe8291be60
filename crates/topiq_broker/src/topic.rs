//! Subscriber bookkeeping
//!
//! One `SubscriberSet` per registered topic. Subscriptions are stored as a
//! `HashSet` of session ids, so a session subscribing twice to the same
//! topic is a no-op.
//!
//! Callers synchronize access through the broker lock.

use std::collections::HashSet;

use topiq_client::SessionId;

#[derive(Debug, Default)]
pub struct SubscriberSet {
    sessions: HashSet<SessionId>,
}

impl SubscriberSet {
    /// Add a session. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: SessionId) {
        self.sessions.insert(id);
    }

    /// Remove a session; returns whether it was subscribed.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.sessions.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.iter()
    }
}
