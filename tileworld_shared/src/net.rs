//! Wire framing.
//!
//! Every message is a fixed 4-byte header followed by the payload:
//!
//! ```text
//! +--------+--------+-----------------+
//! | id u16 | len u16| payload (len B) |
//! +--------+--------+-----------------+
//! ```
//!
//! Both header fields are little-endian. A frame is rejected when it is
//! shorter than the header, its id is not below [`ID_MAX`], or the length
//! field disagrees with the bytes that actually follow.
//!
//! Payload layouts live in [`crate::protocol`].

use anyhow::Context;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_SIZE: usize = 4;
pub const MAX_PAYLOAD: usize = u16::MAX as usize;
/// One past the highest known message id.
pub const ID_MAX: u16 = 7;

/// Identifies a transport session. A player's entity shares its numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    /// server -> clients in level, per tick.
    Move = 0,
    /// server -> clients in level.
    Create = 1,
    /// server -> clients in level.
    Delete = 2,
    /// server -> client, on connect.
    Initial = 3,
    /// client -> server.
    Position = 4,
    /// client -> server.
    Use = 5,
    /// server -> client.
    Transfer = 6,
}

impl MessageId {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => Self::Move,
            1 => Self::Create,
            2 => Self::Delete,
            3 => Self::Initial,
            4 => Self::Position,
            5 => Self::Use,
            6 => Self::Transfer,
            _ => return None,
        })
    }
}

/// Why a frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    Short { len: usize },
    UnknownId(u16),
    LengthMismatch { declared: usize, actual: usize },
    TooLarge(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Short { len } => write!(f, "frame of {len} bytes is shorter than the header"),
            FrameError::UnknownId(id) => write!(f, "unknown message id {id}"),
            FrameError::LengthMismatch { declared, actual } => {
                write!(f, "header declares {declared} payload bytes, got {actual}")
            }
            FrameError::TooLarge(len) => write!(f, "payload of {len} bytes exceeds {MAX_PAYLOAD}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// A verified frame split into id and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u16,
    pub payload: Bytes,
}

impl Message {
    pub fn kind(&self) -> Option<MessageId> {
        MessageId::from_u16(self.id)
    }
}

/// Prepends the header to `payload`.
///
/// The id is written as given; only the length is checked here, so that
/// `verify` stays the single place deciding which ids are known.
pub fn build(id: u16, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u16_le(id);
    buf.put_u16_le(payload.len() as u16);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

pub fn verify(data: &[u8]) -> Result<(), FrameError> {
    if data.len() < HEADER_SIZE {
        return Err(FrameError::Short { len: data.len() });
    }
    let mut header = &data[..HEADER_SIZE];
    let id = header.get_u16_le();
    let declared = header.get_u16_le() as usize;
    if id >= ID_MAX {
        return Err(FrameError::UnknownId(id));
    }
    let actual = data.len() - HEADER_SIZE;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }
    Ok(())
}

/// Verifies `data` and splits off the payload without copying.
pub fn parse(mut data: Bytes) -> Result<Message, FrameError> {
    verify(&data)?;
    let id = data.get_u16_le();
    let _len = data.get_u16_le();
    Ok(Message { id, payload: data })
}

/// Reads one whole frame (header included) from a byte stream.
///
/// Returns `Ok(None)` on a clean end of stream between frames. The frame is
/// not verified; callers run it through [`parse`].
pub async fn read_frame<R>(reader: &mut R) -> anyhow::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("read frame header"),
    }
    let len = u16::from_le_bytes([header[2], header[3]]) as usize;
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + len);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_SIZE + len, 0);
    reader
        .read_exact(&mut frame[HEADER_SIZE..])
        .await
        .context("read frame payload")?;
    Ok(Some(frame.freeze()))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await.context("write frame")?;
    Ok(())
}
