//! topiq_transport
//!
//! The TCP face of the broker: an accept loop that spawns one session
//! task per connection, reads length-prefixed frames, walks the auth
//! state machine and dispatches decoded messages into the broker engine.

pub mod tcp;

pub use tcp::{serve, start_server};

#[cfg(test)]
mod tests;
