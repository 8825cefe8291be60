//! Broker engine
//!
//! The engine owns the topic registry and the session table and drives
//! every operation a session handler can dispatch: topic creation,
//! publish fanout, acknowledgements, subscriptions and authentication.
//!
//! Concurrency and usage notes:
//! - The public API is synchronous and designed to be held behind
//!   `Arc<Mutex<Broker>>` by the transport layer. Fanout happens under
//!   that lock, but a delivery is a push onto the session's unbounded
//!   channel, never network I/O, so the lock is held only briefly.
//!   Per-publisher ordering follows from the session handler dispatching
//!   one frame at a time.
//! - The redelivery loop runs as a background task, re-submitting
//!   persisted unacknowledged messages through the normal publish path
//!   until the store stops returning them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use topiq_client::{SessionHandle, SessionId};
use topiq_persistence::MessageStore;
use topiq_wire::frame::encode_message;
use topiq_wire::{Message, WireFormat};
use tracing::{debug, error, info, warn};

use crate::stats::{Connections, Statistics, TopicDetail};
use crate::topic::SubscriberSet;

/// Shared credential pair. Present iff the broker requires an `AUTH`
/// exchange before anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials from configuration values. Both empty means auth
    /// is disabled; either one set enables it.
    pub fn from_parts(user: &str, password: &str) -> Option<Self> {
        if user.is_empty() && password.is_empty() {
            return None;
        }
        Some(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn matches(&self, msg: &Message) -> bool {
        self.user == msg.user && self.password == msg.password
    }
}

#[derive(Debug)]
pub struct Broker {
    pub topics: HashMap<String, SubscriberSet>,
    pub sessions: HashMap<SessionId, SessionHandle>,
    sent: HashMap<String, Arc<AtomicU64>>,
    store: MessageStore,
    auth: Option<Credentials>,
}

impl Broker {
    pub fn new(store: MessageStore) -> Self {
        Self {
            topics: HashMap::new(),
            sessions: HashMap::new(),
            sent: HashMap::new(),
            store,
            auth: None,
        }
    }

    pub fn new_with_auth(store: MessageStore, auth: Credentials) -> Self {
        let mut broker = Self::new(store);
        broker.auth = Some(auth);
        broker
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn requires_auth(&self) -> bool {
        self.auth.is_some()
    }

    pub fn register_session(&mut self, session: SessionHandle) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// Ensure a registry entry exists for `name`. The entry starts with no
    /// subscribers; publishes are dropped until someone subscribes.
    pub fn create_topic(&mut self, name: &str) {
        if name.is_empty() {
            warn!("ignoring topic without a name");
            return;
        }
        self.topics.entry(name.to_string()).or_default();
        info!(topic = %name, "topic registered");
    }

    /// Subscribe a session, creating the topic on first reference. The
    /// format the subscribe frame arrived in becomes the session's
    /// delivery format if none is bound yet.
    pub fn subscribe(&mut self, session_id: &str, topic: &str, format: WireFormat) {
        if topic.is_empty() {
            warn!(session = %session_id, "ignoring subscribe without a topic name");
            return;
        }

        self.topics
            .entry(topic.to_string())
            .or_default()
            .subscribe(session_id.to_string());

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.bind_format(format);
        }

        info!(session = %session_id, topic = %topic, "new subscriber");
    }

    /// Fan a published message out to every current subscriber of its
    /// topic, each in that session's delivery format.
    ///
    /// A topic with no subscribers drops the message without persisting
    /// it. The first pass of a message (`attempts <= 1`) is saved for the
    /// redelivery scheduler; a failed subscriber write re-saves an
    /// attempts-incremented copy but never aborts delivery to the
    /// remaining subscribers.
    pub fn publish(&mut self, msg: Message) {
        let topic_name = msg.topic.name.clone();

        let subscriber_ids: Vec<SessionId> = match self.topics.get(&topic_name) {
            Some(subs) if !subs.is_empty() => subs.iter().cloned().collect(),
            _ => {
                warn!(topic = %topic_name, id = %msg.id, "no subscribers, dropping message");
                return;
            }
        };

        let mut delivery_failed = false;
        for sid in &subscriber_ids {
            let Some(session) = self.sessions.get(sid) else {
                warn!(session = %sid, topic = %topic_name, "subscriber without a live session");
                delivery_failed = true;
                continue;
            };

            let frame = match encode_message(&msg, session.delivery_format()) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(id = %msg.id, error = %e, "cannot encode message");
                    continue;
                }
            };

            if session.send(frame).is_err() {
                warn!(session = %sid, topic = %topic_name, id = %msg.id, "cannot deliver message");
                delivery_failed = true;
                continue;
            }

            self.sent
                .entry(topic_name.clone())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .fetch_add(1, Ordering::Relaxed);
        }

        if msg.attempts <= 1 {
            if let Err(e) = self.store.save(&msg) {
                error!(id = %msg.id, error = %e, "cannot save message");
            }
        }

        if delivery_failed {
            let mut retry = msg.clone();
            retry.increment_attempts();
            if let Err(e) = self.store.save(&retry) {
                error!(id = %retry.id, error = %e, "cannot queue message for retry");
            }
        }
    }

    /// Forward an acknowledgement to the store. The broker keeps no
    /// in-memory ack state.
    pub fn ack(&mut self, msg: &Message) {
        if let Err(e) = self.store.promote_ack(msg) {
            error!(id = %msg.id, error = %e, "cannot promote acknowledged message");
        }
    }

    /// Check an `AUTH` frame against the configured credentials and reply
    /// on the session's channel. A broker without credentials accepts
    /// everyone. Returns whether the session may continue.
    pub fn authenticate(&mut self, session_id: &str, msg: &Message) -> bool {
        let ok = match &self.auth {
            None => true,
            Some(credentials) => credentials.matches(msg),
        };

        let mut reply = msg.clone();
        if ok {
            reply.mark_auth_success();
        } else {
            warn!(session = %session_id, user = %msg.user, "authentication failed");
            reply.mark_auth_failed();
        }

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.authenticated = ok;
            match encode_message(&reply, session.delivery_format()) {
                Ok(frame) => {
                    let _ = session.send(frame);
                }
                Err(e) => error!(error = %e, "cannot encode auth reply"),
            }
        }

        ok
    }

    /// Remove a session everywhere: its handle, and its rows in every
    /// subscriber set. Registry entries left empty are dropped; topic
    /// names are not reserved.
    pub fn disconnect(&mut self, session_id: &str) {
        self.sessions.remove(session_id);

        self.topics.retain(|name, subs| {
            if subs.unsubscribe(session_id) {
                debug!(session = %session_id, topic = %name, "subscriber removed");
            }
            if subs.is_empty() {
                info!(topic = %name, "topic has no subscribers left, dropping");
                false
            } else {
                true
            }
        });
    }

    /// Aggregate counters for the stats endpoint.
    pub fn stats(&self) -> Statistics {
        let mut subscribed: HashSet<&str> = HashSet::new();
        let mut topics = HashMap::new();

        for (name, subs) in &self.topics {
            for id in subs.iter() {
                subscribed.insert(id.as_str());
            }
            let sent = self
                .sent
                .get(name)
                .map(|counter| counter.load(Ordering::Relaxed))
                .unwrap_or(0);
            topics.insert(
                name.clone(),
                TopicDetail {
                    subscribers: subs.len(),
                    messages_sent: sent,
                },
            );
        }

        Statistics {
            connections: Connections {
                active: self.sessions.len(),
                total_connected: subscribed.len(),
            },
            topics,
        }
    }

    /// Periodically re-submit persisted unacknowledged messages through
    /// the publish path. The sleep restarts only after a pass finishes,
    /// so ticks never overlap; publish skips its first-save branch for
    /// these messages because their attempts are already past 1.
    pub async fn start_redelivery_loop(broker: Arc<Mutex<Broker>>, every: Duration) {
        loop {
            tokio::time::sleep(every).await;

            let mut broker = broker.lock().unwrap();
            let pending = match broker.store.scan_undelivered() {
                Ok(pending) => pending,
                Err(e) => {
                    error!(error = %e, "cannot scan undelivered messages");
                    continue;
                }
            };

            if pending.is_empty() {
                continue;
            }

            debug!(count = pending.len(), "re-publishing undelivered messages");
            for msg in pending {
                broker.publish(msg);
            }
        }
    }
}
