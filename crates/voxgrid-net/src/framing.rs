//! Length-prefixed JSON framing for TCP streams.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does not include the prefix itself. Payloads are UTF-8 JSON
//! documents; a zero-length frame is a keepalive and carries no packet.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MiB.
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
    PayloadTooLarge { size: usize, max: u32 },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// A complete frame was received but is not a valid packet. The stream
    /// is still in sync and the next frame can be read.
    #[error("malformed packet: {0}")]
    Malformed(#[source] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_on_eof(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read a single length-prefixed frame and return its payload.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_on_eof)?;

    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len as usize,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    }
    Ok(payload)
}

/// Write a single length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= config.max_payload_size)
        .ok_or(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: config.max_payload_size,
        })?;

    writer.write_all(&len.to_le_bytes()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Encodes a packet as a frame payload.
pub fn encode_packet<T: Serialize>(packet: &T) -> Result<Vec<u8>, FrameError> {
    serde_json::to_vec(packet).map_err(FrameError::Malformed)
}

/// Reads the next packet, skipping keepalive frames.
pub async fn read_packet<T: DeserializeOwned, R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<T, FrameError> {
    loop {
        let payload = read_frame(reader, config).await?;
        if payload.is_empty() {
            tracing::trace!("Keepalive frame");
            continue;
        }
        return serde_json::from_slice(&payload).map_err(FrameError::Malformed);
    }
}

/// Serializes `packet` as JSON and writes it as one frame.
pub async fn write_packet<T: Serialize, W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    packet: &T,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let payload = encode_packet(packet)?;
    write_frame(writer, &payload, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_in_sequence_dont_merge() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        for msg in [&b"first"[..], b"second", b"third"] {
            write_frame(&mut client, msg, &config).await.unwrap();
        }
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"second");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        let (mut client, mut server) = duplex(8);
        let config = FrameConfig::default();
        let payload = br#"{"type":"ATTACH","data":{"voxel":{"position":[1.0,1.0,1.0],"color":1}}}"#;

        let write_config = config.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, payload, &write_config).await.unwrap();
        });

        let received = read_frame(&mut server, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };
        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 1024, .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };
        let result = write_frame(&mut client, &[0u8; 1024], &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_connection_closed_during_length_read() {
        let (client, mut server) = duplex(8192);
        drop(client);
        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(&[5, 0, 0, 0]).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        client.flush().await.unwrap();

        let received = read_frame(&mut server, &FrameConfig::default()).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn test_packet_skips_keepalive() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, &[], &config).await.unwrap();
        write_packet(&mut client, &vec![1, 2, 3], &config).await.unwrap();

        let packet: Vec<u32> = read_packet(&mut server, &config).await.unwrap();
        assert_eq!(packet, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_malformed_packet_keeps_stream_usable() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, b"{not json", &config).await.unwrap();
        write_packet(&mut client, &"ok", &config).await.unwrap();

        let first: Result<String, _> = read_packet(&mut server, &config).await;
        assert!(matches!(first, Err(FrameError::Malformed(_))));
        let second: String = read_packet(&mut server, &config).await.unwrap();
        assert_eq!(second, "ok");
    }
}
