//! Wire framing shared by clients, shards and the origin.
//!
//! # Message Framing
//!
//! Every message is one length-prefixed frame:
//! ```text
//! [4 bytes: payload length (big-endian u32)]
//! [N bytes: payload]
//! ```
//!
//! # Exchanges
//!
//! ```text
//! client ──key──▶ shard ──key──▶ origin
//! client ◀─reply─ shard ◀─body── origin
//! ```
//!
//! A shard replies with one of the fixed denial sentinels or with
//! `"<key>: <content>"`. The origin replies with `"File does not exist."` or
//! the raw content. Each connection carries exactly one exchange.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum size of a key or object content frame.
pub const MAX_FRAME_LEN: usize = 1024;

/// Maximum size of a shard reply frame (`key: content`).
pub const MAX_REPLY_LEN: usize = 2 * MAX_FRAME_LEN + 2;

/// Reply for a key denied by the blacklist gate.
pub const ACCESS_DENIED: &str = "Access Denied.";

/// Reply for a key the origin does not hold.
pub const FILE_NOT_FOUND: &str = "Access Denied. File does not exist.";

/// Reply when the origin could not be reached.
pub const ORIGIN_UNAVAILABLE: &str = "Access Denied. Origin unavailable.";

/// Origin response for an unknown key.
pub const ORIGIN_NOT_FOUND: &str = "File does not exist.";

/// Separator between key and content in a success reply.
const OBJECT_SEPARATOR: &str = ": ";

/// Errors from frame operations.
#[derive(Debug, Error)]
pub enum FrameError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the channel or sent an empty frame.
    #[error("Peer disconnected")]
    Disconnected,

    /// Frame length exceeds the bound for this exchange.
    #[error("Frame too large: {0} bytes (max {1})")]
    TooLarge(usize, usize),

    /// Key frame is not valid UTF-8.
    #[error("Key is not valid UTF-8")]
    InvalidKey,

    /// Reply does not match any known form.
    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(String),
}

/// Read one frame of at most `max_len` bytes.
///
/// An empty frame is returned as-is; callers decide whether it is valid.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Bytes, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Disconnected);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge(len, max_len));
    }

    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(Bytes::from(buf)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Disconnected),
        Err(e) => Err(e.into()),
    }
}

/// Write one frame of at most `max_len` bytes and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
    max_len: usize,
) -> Result<(), FrameError> {
    if data.len() > max_len {
        return Err(FrameError::TooLarge(data.len(), max_len));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;

    Ok(())
}

/// Read a request key frame.
///
/// A zero-length frame counts as a disconnect.
pub async fn read_key<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<String, FrameError> {
    let frame = read_frame(reader, MAX_FRAME_LEN).await?;
    if frame.is_empty() {
        return Err(FrameError::Disconnected);
    }
    String::from_utf8(frame.to_vec()).map_err(|_| FrameError::InvalidKey)
}

/// Write a request key frame.
pub async fn write_key<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    key: &str,
) -> Result<(), FrameError> {
    write_frame(writer, key.as_bytes(), MAX_FRAME_LEN).await
}

/// Shard reply to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Key is blacklisted.
    Denied,
    /// Key does not exist at the origin.
    NotFound,
    /// Origin could not be reached while a reply was owed.
    Unavailable,
    /// The object content.
    Object {
        /// Requested key.
        key: String,
        /// Object content.
        content: Bytes,
    },
}

impl Reply {
    /// Encode the reply payload.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Reply::Denied => Bytes::from_static(ACCESS_DENIED.as_bytes()),
            Reply::NotFound => Bytes::from_static(FILE_NOT_FOUND.as_bytes()),
            Reply::Unavailable => Bytes::from_static(ORIGIN_UNAVAILABLE.as_bytes()),
            Reply::Object { key, content } => {
                let mut buf =
                    BytesMut::with_capacity(key.len() + OBJECT_SEPARATOR.len() + content.len());
                buf.put_slice(key.as_bytes());
                buf.put_slice(OBJECT_SEPARATOR.as_bytes());
                buf.put_slice(content);
                buf.freeze()
            }
        }
    }

    /// Decode a reply to a request for `expected_key`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnexpectedReply`] if the payload is neither a
    /// sentinel nor prefixed with `"<expected_key>: "`.
    pub fn parse(expected_key: &str, payload: &[u8]) -> Result<Self, FrameError> {
        match payload {
            p if p == ACCESS_DENIED.as_bytes() => return Ok(Reply::Denied),
            p if p == FILE_NOT_FOUND.as_bytes() => return Ok(Reply::NotFound),
            p if p == ORIGIN_UNAVAILABLE.as_bytes() => return Ok(Reply::Unavailable),
            _ => {}
        }

        let prefix_len = expected_key.len() + OBJECT_SEPARATOR.len();
        if payload.len() >= prefix_len
            && payload.starts_with(expected_key.as_bytes())
            && &payload[expected_key.len()..prefix_len] == OBJECT_SEPARATOR.as_bytes()
        {
            return Ok(Reply::Object {
                key: expected_key.to_string(),
                content: Bytes::copy_from_slice(&payload[prefix_len..]),
            });
        }

        Err(FrameError::UnexpectedReply(
            String::from_utf8_lossy(payload).into_owned(),
        ))
    }

    /// Object content, if this is a success reply.
    pub fn content(&self) -> Option<&Bytes> {
        match self {
            Reply::Object { content, .. } => Some(content),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// Write a shard reply frame.
pub async fn write_reply<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    reply: &Reply,
) -> Result<(), FrameError> {
    write_frame(writer, &reply.to_bytes(), MAX_REPLY_LEN).await
}

/// Read and decode a shard reply frame.
pub async fn read_reply<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    expected_key: &str,
) -> Result<Reply, FrameError> {
    let frame = read_frame(reader, MAX_REPLY_LEN).await?;
    Reply::parse(expected_key, &frame)
}
