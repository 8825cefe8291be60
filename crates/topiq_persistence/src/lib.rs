//! topiq_persistence
//!
//! Durable storage for unacknowledged messages, backed by `sled`.
//! Pending messages live under `false-`-prefixed keys; acknowledging a
//! message atomically moves it to its bare `next_id` key. The redelivery
//! scheduler finds work with a prefix scan over the pending keyspace.

pub mod sled_store;

pub use sled_store::{MessageStore, StoreError, MAX_DELIVERY_ATTEMPTS};

#[cfg(test)]
mod tests;
