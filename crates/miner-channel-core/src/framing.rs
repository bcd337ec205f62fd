//! Length-prefixed wire framing
//!
//! Every Noise message (handshake or transport) travels as a 2-byte big-endian
//! length followed by the message bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest Noise message allowed on the wire
pub const MAX_NOISE_MESSAGE: usize = 65535;

/// AEAD tag appended to every transport message
pub const TAG_LEN: usize = 16;

/// Largest plaintext payload that fits in one transport message
pub const MAX_PAYLOAD: usize = MAX_NOISE_MESSAGE - TAG_LEN;

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u16::try_from(frame.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {}", frame.len(), MAX_NOISE_MESSAGE),
        )
    })?;

    let mut buffer = Vec::with_capacity(frame.len() + 2);
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(frame);
    writer.write_all(&buffer).await?;
    writer.flush().await
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_preserve_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"one").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        write_frame(&mut client, b"three").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"one");
        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"");
        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"three");
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0, 10, 1, 2, 3]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, _server) = tokio::io::duplex(1024);
        let oversized = vec![0u8; MAX_NOISE_MESSAGE + 1];
        let err = write_frame(&mut client, &oversized).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
