//! Frame codec.
//!
//! A frame is the decimal ASCII length of the payload, a newline, and then
//! exactly that many bytes of UTF-8 JSON: `17\n{"action": "bla"}`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{FramingErrorKind, WireError, WireResult};

use super::Body;

/// Maximum payload size (1 MB by default, can be overridden).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Bounds applied while decoding frames from an untrusted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Largest declared payload length that will be read.
    pub max_frame_size: usize,
}

impl FrameLimits {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Longest length prefix worth waiting for.
    ///
    /// Any prefix with more digits than the maximum size already declares an
    /// oversized frame, so the newline must arrive within this many bytes.
    pub fn max_prefix_digits(&self) -> usize {
        self.max_frame_size.checked_ilog10().map_or(1, |d| d as usize + 1)
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Serialize a message into a complete frame.
pub fn encode<T: Serialize>(message: &T) -> WireResult<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let prefix = payload.len().to_string();

    let mut frame = Vec::with_capacity(prefix.len() + 1 + payload.len());
    frame.extend_from_slice(prefix.as_bytes());
    frame.push(b'\n');
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one frame and return its raw payload.
///
/// The length prefix is read a byte at a time so nothing past the declared
/// payload is consumed; the reader is left at the start of the next frame.
/// End of stream before the first prefix byte is reported as
/// [`WireError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R, limits: FrameLimits) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let max_digits = limits.max_prefix_digits();
    let mut len: usize = 0;
    let mut digits = 0usize;

    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(if digits == 0 {
                    WireError::ConnectionClosed
                } else {
                    WireError::framing(FramingErrorKind::UnterminatedLength)
                });
            }
            Err(e) => return Err(WireError::Io(e)),
        };

        match byte {
            b'\n' => break,
            b'0'..=b'9' => {
                if digits == max_digits {
                    return Err(WireError::framing(FramingErrorKind::LengthPrefixTooLong {
                        max_digits,
                    }));
                }
                digits += 1;
                len = len
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(usize::from(byte - b'0')))
                    .ok_or_else(|| {
                        WireError::framing(FramingErrorKind::FrameTooLarge {
                            size: usize::MAX,
                            max: limits.max_frame_size,
                        })
                    })?;
            }
            other => {
                return Err(WireError::framing(FramingErrorKind::MalformedLength {
                    byte: other,
                }))
            }
        }
    }

    if digits == 0 {
        return Err(WireError::framing(FramingErrorKind::EmptyLength));
    }

    // Sanity check frame size before touching the payload
    if len > limits.max_frame_size {
        return Err(WireError::framing(FramingErrorKind::FrameTooLarge {
            size: len,
            max: limits.max_frame_size,
        }));
    }

    let mut buf = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = reader.read(&mut buf[read..]).await?;
        if n == 0 {
            return Err(WireError::framing(FramingErrorKind::Truncated {
                read,
                expected: len,
            }));
        }
        read += n;
    }

    Ok(buf)
}

/// Parse a frame payload as a JSON object.
pub fn parse_payload(payload: &[u8]) -> WireResult<Body> {
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
        WireError::framing(FramingErrorKind::InvalidJson {
            message: e.to_string(),
        })
    })?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(WireError::framing(FramingErrorKind::NotAnObject)),
    }
}

/// Read one frame and deserialize its payload.
pub async fn decode<T, R>(reader: &mut R, limits: FrameLimits) -> WireResult<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader, limits).await?;
    serde_json::from_slice(&payload).map_err(|e| {
        WireError::framing(FramingErrorKind::InvalidJson {
            message: e.to_string(),
        })
    })
}

/// Write a pre-encoded frame.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode and write a message.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    write_frame(writer, &frame).await
}

/// Read a frame with a timeout.
///
/// Returns a Timeout error if no complete frame arrives within the duration.
pub async fn read_frame_with_timeout<R>(
    reader: &mut R,
    limits: FrameLimits,
    timeout_duration: Duration,
) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    timeout(timeout_duration, read_frame(reader, limits))
        .await
        .map_err(|_| WireError::Timeout {
            after: timeout_duration,
        })?
}

/// Write a message with a timeout.
pub async fn write_message_with_timeout<W, T>(
    writer: &mut W,
    message: &T,
    timeout_duration: Duration,
) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    timeout(timeout_duration, write_message(writer, message))
        .await
        .map_err(|_| WireError::Timeout {
            after: timeout_duration,
        })?
}
