//! Message definitions for the broker
//!
//! `Message` is the canonical wire/internal representation used on every
//! path: session dispatch, fanout, persistence, and redelivery. The same
//! record travels in two encodings selected per frame (see
//! [`crate::frame::WireFormat`]).
//!
//! Notes on fields:
//! - `id`: current storage key. Unacknowledged messages carry a
//!   `false-`-prefixed id; acknowledged ones carry `next_id`.
//! - `next_id`: the key the message migrates to when acknowledged.
//!   Assigned by the publisher and immutable afterwards.
//! - `body`: opaque payload bytes; `body_string` is its textual mirror.
//!   Both are filled from the same bytes at build time.
//! - `timestamp`: producer-supplied epoch seconds, informational only.
//! - `attempts`: delivery attempts recorded by the broker, never
//!   decreasing for a given `next_id`.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Key prefix reserved for unacknowledged messages.
pub const PENDING_PREFIX: &str = "false-";

/// Named routing key. Topics are equal iff their names are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// The fixed set of message variants understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "NEW_TOPIC")]
    NewTopic,
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage,
    #[serde(rename = "NEW_SUB")]
    NewSub,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "AUTH")]
    Auth,
    #[serde(rename = "AUTH_SUCCESS")]
    AuthSuccess,
    #[serde(rename = "AUTH_FAILED")]
    AuthFailed,
}

impl MessageKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            MessageKind::NewTopic => "NEW_TOPIC",
            MessageKind::NewMessage => "NEW_MESSAGE",
            MessageKind::NewSub => "NEW_SUB",
            MessageKind::Ack => "ACK",
            MessageKind::Auth => "AUTH",
            MessageKind::AuthSuccess => "AUTH_SUCCESS",
            MessageKind::AuthFailed => "AUTH_FAILED",
        }
    }

    pub fn from_wire(s: &str) -> Result<Self, CodecError> {
        match s {
            "NEW_TOPIC" => Ok(MessageKind::NewTopic),
            "NEW_MESSAGE" => Ok(MessageKind::NewMessage),
            "NEW_SUB" => Ok(MessageKind::NewSub),
            "ACK" => Ok(MessageKind::Ack),
            "AUTH" => Ok(MessageKind::Auth),
            "AUTH_SUCCESS" => Ok(MessageKind::AuthSuccess),
            "AUTH_FAILED" => Ok(MessageKind::AuthFailed),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Errors produced while encoding or decoding message payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid textual payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary payload ended early")]
    Truncated,
    #[error("unknown message type {0:?}")]
    UnknownKind(String),
    #[error("field is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub next_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub topic: Topic,
    #[serde(default, with = "body_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub body_string: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub ack: bool,
    #[serde(default)]
    pub attempts: u32,
}

/// Raw-bytes carrier for `body` in the textual encoding.
///
/// Bytes that already form a JSON value are embedded verbatim, so
/// `"body":{"greeting":"hi"}` goes over the wire as an object, not as an
/// escaped string. Bytes that are not JSON (they came in through the
/// binary encoding) travel as a plain JSON string instead. On decode, a
/// string carrier yields its contents, anything else yields the raw
/// value text, and `null` or a missing field yields an empty body.
mod body_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::value::RawValue;

    pub fn serialize<S: Serializer>(body: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        if body.is_empty() {
            return ser.serialize_none();
        }

        if let Ok(text) = std::str::from_utf8(body) {
            if let Ok(raw) = RawValue::from_string(text.to_string()) {
                return raw.serialize(ser);
            }
        }

        ser.serialize_str(&String::from_utf8_lossy(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let raw = Box::<RawValue>::deserialize(de)?;
        let text = raw.get();

        if text == "null" {
            return Ok(Vec::new());
        }
        if text.starts_with('"') {
            let s: String = serde_json::from_str(text).map_err(D::Error::custom)?;
            return Ok(s.into_bytes());
        }
        Ok(text.as_bytes().to_vec())
    }
}

impl Message {
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Storage key for a not-yet-acknowledged message.
    pub fn pending_id(next_id: &str) -> String {
        format!("{PENDING_PREFIX}{next_id}")
    }

    pub fn is_pending(&self) -> bool {
        self.id.starts_with(PENDING_PREFIX)
    }

    /// Move the message into its acknowledged identity: the id becomes
    /// `next_id` and the ack flag is set.
    pub fn promote_to_ack(&mut self) {
        self.id = self.next_id.clone();
        self.ack = true;
    }

    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    pub fn mark_auth_success(&mut self) {
        self.kind = MessageKind::AuthSuccess;
    }

    pub fn mark_auth_failed(&mut self) {
        self.kind = MessageKind::AuthFailed;
    }

    pub fn encode_text(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode_text(payload: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Compact binary encoding: length-prefixed fields in a fixed order,
    /// all integers little-endian. Strings and the topic name carry u16
    /// prefixes, the two bodies u32, followed by the i64 timestamp, one
    /// ack byte and the i32 attempts counter.
    pub fn encode_binary(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64 + self.body.len() + self.body_string.len());

        put_str16(&mut buf, &self.id);
        put_str16(&mut buf, &self.next_id);
        put_str16(&mut buf, self.kind.as_wire());
        put_str16(&mut buf, &self.user);
        put_str16(&mut buf, &self.password);
        put_str16(&mut buf, &self.topic.name);

        buf.put_u32_le(self.body.len() as u32);
        buf.put_slice(&self.body);
        buf.put_u32_le(self.body_string.len() as u32);
        buf.put_slice(self.body_string.as_bytes());

        buf.put_i64_le(self.timestamp);
        buf.put_u8(self.ack as u8);
        buf.put_i32_le(self.attempts as i32);

        buf.to_vec()
    }

    pub fn decode_binary(payload: &[u8]) -> Result<Self, CodecError> {
        let mut buf = payload;

        let id = get_str16(&mut buf)?;
        let next_id = get_str16(&mut buf)?;
        let kind = MessageKind::from_wire(&get_str16(&mut buf)?)?;
        let user = get_str16(&mut buf)?;
        let password = get_str16(&mut buf)?;
        let topic = Topic {
            name: get_str16(&mut buf)?,
        };

        let body = get_bytes32(&mut buf)?;
        let body_string = String::from_utf8(get_bytes32(&mut buf)?)?;

        if buf.remaining() < 8 + 1 + 4 {
            return Err(CodecError::Truncated);
        }
        let timestamp = buf.get_i64_le();
        let ack = buf.get_u8() == 1;
        let attempts = buf.get_i32_le().max(0) as u32;

        Ok(Self {
            id,
            next_id,
            kind,
            user,
            password,
            topic,
            body,
            body_string,
            timestamp,
            ack,
            attempts,
        })
    }

    pub fn encode(&self, format: crate::frame::WireFormat) -> Result<Vec<u8>, CodecError> {
        match format {
            crate::frame::WireFormat::Text => self.encode_text(),
            crate::frame::WireFormat::Binary => Ok(self.encode_binary()),
        }
    }

    pub fn decode(format: crate::frame::WireFormat, payload: &[u8]) -> Result<Self, CodecError> {
        match format {
            crate::frame::WireFormat::Text => Self::decode_text(payload),
            crate::frame::WireFormat::Binary => Self::decode_binary(payload),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message {} {} ({} bytes) at {}",
            self.kind,
            self.topic,
            self.body.len(),
            self.timestamp
        )
    }
}

fn put_str16(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str16(buf: &mut &[u8]) -> Result<String, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let s = String::from_utf8(buf[..len].to_vec())?;
    buf.advance(len);
    Ok(s)
}

fn get_bytes32(buf: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

/// Builder for [`Message`]. Fresh messages default to the current epoch
/// second, `ack = false` and zero attempts; setting the body fills
/// `body_string` from the same bytes.
#[derive(Debug)]
pub struct MessageBuilder {
    msg: Message,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            msg: Message {
                id: String::new(),
                next_id: String::new(),
                kind: MessageKind::NewMessage,
                user: String::new(),
                password: String::new(),
                topic: Topic::default(),
                body: Vec::new(),
                body_string: String::new(),
                timestamp: chrono::Utc::now().timestamp(),
                ack: false,
                attempts: 0,
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.msg.id = id.into();
        self
    }

    pub fn next_id(mut self, next_id: impl Into<String>) -> Self {
        self.msg.next_id = next_id.into();
        self
    }

    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.msg.kind = kind;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.msg.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.msg.password = password.into();
        self
    }

    pub fn topic(mut self, topic: Topic) -> Self {
        self.msg.topic = topic;
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.msg.body = body.into();
        self.msg.body_string = String::from_utf8_lossy(&self.msg.body).into_owned();
        self
    }

    pub fn timestamp(mut self, ts: i64) -> Self {
        self.msg.timestamp = ts;
        self
    }

    pub fn ack(mut self, ack: bool) -> Self {
        self.msg.ack = ack;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.msg.attempts = attempts;
        self
    }

    pub fn build(self) -> Message {
        self.msg
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
