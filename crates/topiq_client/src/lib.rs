//! topiq_client
//!
//! Broker-side representation of a connected peer. The transport creates
//! one [`SessionHandle`] per accepted connection and registers it with the
//! broker; the broker pushes pre-framed bytes through the handle's channel
//! and a writer task owned by the transport drains them onto the socket.

pub mod session;

pub use session::{SessionHandle, SessionId};
