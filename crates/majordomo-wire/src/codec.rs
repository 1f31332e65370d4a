//! Multi-frame message framing.
//!
//! A message on the wire is a 4-byte big-endian frame count followed by each
//! frame as a 4-byte big-endian length and its bytes:
//!
//! ```text
//! [count: u32] ([len: u32][bytes; len])*
//! ```

use bytes::Bytes;
use majordomo_types::error::ProtocolError;
use majordomo_types::message::Message;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum number of frames in one message.
pub const MAX_FRAMES: u32 = 1024;

/// Errors from the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Too many frames: {count} (max {max})")]
    TooManyFrames { count: u32, max: u32 },
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Could not connect to {addr} within {timeout_ms} ms")]
    ConnectTimeout { addr: SocketAddr, timeout_ms: u64 },
    #[error("Counterpart silent for {silent_ms} ms")]
    LivenessExpired { silent_ms: u64 },
    #[error("Not connected")]
    NotConnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Encode a message to bytes.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    let count = msg.parts() as u32;
    if count > MAX_FRAMES {
        return Err(WireError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }
    let mut bytes = Vec::with_capacity(4 + 4 * msg.parts() + msg.byte_len());
    bytes.extend_from_slice(&count.to_be_bytes());
    for frame in msg.frames() {
        let len = frame.len() as u32;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(frame);
    }
    Ok(bytes)
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// EOF before the first byte of a message is a clean [`WireError::ConnectionClosed`];
/// EOF anywhere else is an I/O error. Not cancel-safe.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let count = match reader.read_u32().await {
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    };
    if count > MAX_FRAMES {
        return Err(WireError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }

    let mut msg = Message::new();
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        msg.push_back(Bytes::from(body));
    }
    Ok(msg)
}
