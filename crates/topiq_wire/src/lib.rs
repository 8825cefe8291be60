//! topiq_wire
//!
//! Wire-level types shared by every other crate: the canonical `Message`
//! model with its textual and binary payload encodings, and the frame
//! codec that moves encoded payloads over a stream.
//!
//! Nothing in this crate talks to the broker or the store; it only knows
//! how bytes are laid out.

pub mod frame;
pub mod message;

pub use frame::{read_frame, write_frame, FrameError, WireFormat, MAX_FRAME_LEN};
pub use message::{CodecError, Message, MessageBuilder, MessageKind, Topic, PENDING_PREFIX};
