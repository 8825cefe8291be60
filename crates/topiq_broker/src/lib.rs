//! topiq_broker
//!
//! The broker crate contains the central engine responsible for the topic
//! registry, publish fanout, acknowledgement handling, authentication and
//! the redelivery scheduler.
//!
//! Public types:
//! - `Broker`: core engine; registers sessions, routes published messages
//!   to subscribers, forwards acks to the store.
//! - `Credentials`: the shared user/password pair, when auth is enabled.
//!
//! This crate is driven by the transport crate (TCP session handlers) and
//! by the binary crate that wires network, configuration and persistence
//! together.

pub mod engine;
pub mod stats;
pub mod topic;

pub use engine::{Broker, Credentials};
pub use stats::Statistics;
