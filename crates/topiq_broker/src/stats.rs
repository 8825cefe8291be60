//! Aggregate counters exposed by the stats endpoint.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Statistics {
    pub connections: Connections,
    pub topics: HashMap<String, TopicDetail>,
}

#[derive(Debug, Serialize)]
pub struct Connections {
    /// Sessions currently registered with the broker.
    pub active: usize,
    /// Distinct sessions holding at least one subscription.
    pub total_connected: usize,
}

#[derive(Debug, Serialize)]
pub struct TopicDetail {
    pub subscribers: usize,
    pub messages_sent: u64,
}
