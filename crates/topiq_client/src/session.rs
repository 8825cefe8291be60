//! Session representation
//!
//! `SessionHandle` holds the sending side of a per-connection channel used
//! by the broker to push encoded frames, plus the session's delivery
//! format and auth state. The `authenticated` flag is flipped by the
//! transport after a successful credential check.

use bytes::Bytes;
use tokio::sync::mpsc::{error::SendError, UnboundedSender};
use topiq_wire::WireFormat;
use uuid::Uuid;

pub type SessionId = String;

#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub sender: UnboundedSender<Bytes>,
    /// Bound by the first `NEW_SUB`; deliveries before that use the
    /// textual default.
    pub format: Option<WireFormat>,
    pub authenticated: bool,
}

impl SessionHandle {
    /// Create a handle around a sender channel. The `id` is a UUID used to
    /// identify the session across broker operations.
    pub fn new(sender: UnboundedSender<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            format: None,
            authenticated: false,
        }
    }

    /// The format delivered frames are encoded in for this session.
    pub fn delivery_format(&self) -> WireFormat {
        self.format.unwrap_or(WireFormat::Text)
    }

    /// Record the format of the session's first subscribe; later
    /// subscribes keep the first binding.
    pub fn bind_format(&mut self, format: WireFormat) {
        if self.format.is_none() {
            self.format = Some(format);
        }
    }

    /// Queue a frame for delivery. Fails only when the writer task is
    /// gone, i.e. the peer is disconnected.
    pub fn send(&self, frame: Bytes) -> Result<(), SendError<Bytes>> {
        self.sender.send(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn format_defaults_to_text_until_bound() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = SessionHandle::new(tx);
        assert_eq!(session.delivery_format(), WireFormat::Text);

        session.bind_format(WireFormat::Binary);
        assert_eq!(session.delivery_format(), WireFormat::Binary);

        // later subscribes do not rebind
        session.bind_format(WireFormat::Text);
        assert_eq!(session.delivery_format(), WireFormat::Binary);
    }

    #[test]
    fn send_fails_after_receiver_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SessionHandle::new(tx);
        drop(rx);
        assert!(session.send(Bytes::from_static(b"frame")).is_err());
    }
}
