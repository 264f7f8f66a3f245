//! Length-prefixed framing for TCP streams.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does not include the 4 prefix bytes themselves.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MB, enough for a
    /// compressed full-chunk resend with headroom.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a single length-prefixed frame from the stream.
///
/// Returns the payload bytes. Returns [`FrameError::ConnectionClosed`] if
/// the peer closes the connection before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FrameError::ConnectionClosed)
        }
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Write a single length-prefixed frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = payload.len() as u32;
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = duplex(4096);
        let config = FrameConfig::default();

        write_frame(&mut a, b"hello world", &config).await.unwrap();
        let payload = read_frame(&mut b, &config).await.unwrap();
        assert_eq!(payload, b"hello world");
    }

    #[tokio::test]
    async fn test_multiple_frames_preserve_boundaries() {
        let (mut a, mut b) = duplex(4096);
        let config = FrameConfig::default();

        write_frame(&mut a, b"first", &config).await.unwrap();
        write_frame(&mut a, b"", &config).await.unwrap();
        write_frame(&mut a, b"third", &config).await.unwrap();

        assert_eq!(read_frame(&mut b, &config).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut b, &config).await.unwrap(), b"");
        assert_eq!(read_frame(&mut b, &config).await.unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut a, mut b) = duplex(4096);
        let big = FrameConfig {
            max_payload_size: 1024,
        };
        let small = FrameConfig {
            max_payload_size: 16,
        };

        write_frame(&mut a, &[7u8; 64], &big).await.unwrap();
        let err = read_frame(&mut b, &small).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { size: 64, max: 16 }
        ));
    }

    #[tokio::test]
    async fn test_closed_mid_frame_reports_connection_closed() {
        let (mut a, mut b) = duplex(4096);
        // Length prefix promising 100 bytes, then close.
        tokio::io::AsyncWriteExt::write_all(&mut a, &100u32.to_le_bytes())
            .await
            .unwrap();
        drop(a);

        let err = read_frame(&mut b, &FrameConfig::default()).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }
}
