//! Frame codec
//!
//! Every unit on the wire is `| 1 byte format tag | 4 byte LE u32 payload
//! length | payload |`. The tag selects the payload encoding; peers may
//! mix tags across frames on one connection.
//!
//! Oversized frames are drained off the stream so the connection stays
//! usable. End-of-stream on the tag byte is a clean close; inside a frame
//! it is a protocol error.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{CodecError, Message};

/// Largest payload accepted or produced, 10 MiB.
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

/// Payload encoding selector carried in the frame tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `0x01`, JSON object payload.
    Text,
    /// `0x02`, compact little-endian payload.
    Binary,
}

impl WireFormat {
    pub fn tag(self) -> u8 {
        match self {
            WireFormat::Text => 0x01,
            WireFormat::Binary => 0x02,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(WireFormat::Text),
            0x02 => Some(WireFormat::Binary),
            _ => None,
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Text => f.write_str("text"),
            WireFormat::Binary => f.write_str("binary"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Peer closed the stream between frames.
    #[error("connection closed")]
    Closed,
    /// Stream ended inside a frame.
    #[error("stream ended mid-frame")]
    Truncated,
    /// Declared length beyond [`MAX_FRAME_LEN`]; the payload has already
    /// been drained when this is returned.
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized(u32),
    #[error("unknown format tag {0:#04x}")]
    UnknownTag(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream is still frame-aligned and worth reading from.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Oversized(_))
    }
}

/// Read one frame. Returns the payload encoding and the raw payload;
/// decoding is the caller's business.
pub async fn read_frame<R>(reader: &mut R) -> Result<(WireFormat, Bytes), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    if let Err(e) = reader.read_exact(&mut tag).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::Closed,
            _ => FrameError::Io(e),
        });
    }
    let format = WireFormat::from_tag(tag[0]).ok_or(FrameError::UnknownTag(tag[0]))?;

    let mut len_buf = [0u8; 4];
    read_or_truncated(reader, &mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_FRAME_LEN {
        drain(reader, len as u64).await?;
        return Err(FrameError::Oversized(len));
    }

    let mut payload = vec![0u8; len as usize];
    read_or_truncated(reader, &mut payload).await?;

    Ok((format, Bytes::from(payload)))
}

async fn read_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => FrameError::Truncated,
        _ => FrameError::Io(e),
    })?;
    Ok(())
}

async fn drain<R>(reader: &mut R, len: u64) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let copied = tokio::io::copy(&mut reader.take(len), &mut tokio::io::sink()).await?;
    if copied < len {
        return Err(FrameError::Truncated);
    }
    Ok(())
}

/// Frame a raw payload: tag, length, bytes.
pub fn encode_frame(format: WireFormat, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(format.tag());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a message in the given format and wrap it in a frame, ready to
/// hand to a socket or a session's outbound queue.
pub fn encode_message(msg: &Message, format: WireFormat) -> Result<Bytes, CodecError> {
    Ok(encode_frame(format, &msg.encode(format)?))
}

/// Write one message as a single frame.
pub async fn write_frame<W>(
    writer: &mut W,
    msg: &Message,
    format: WireFormat,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(msg, format)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
