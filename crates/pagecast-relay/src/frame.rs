//! Length-prefixed frame codec for relay connections.
//!
//! A connection starts with one newline-terminated handshake line carrying
//! the peer's declared connection URI. Media then flows as frames of a
//! 4-byte big-endian length followed by that many payload bytes.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_FRAME_BYTES;

/// Write the connect handshake line (peer side).
pub async fn write_handshake<W>(writer: &mut W, declared_uri: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(declared_uri.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Write one media frame (peer side).
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one media frame. Returns `None` on a clean end-of-stream at a frame
/// boundary; EOF inside a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"chunk one").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        write_frame(&mut client, b"chunk two").await.unwrap();
        drop(client);

        assert_eq!(
            read_frame(&mut server).await.unwrap().as_deref(),
            Some(b"chunk one".as_ref())
        );
        assert_eq!(
            read_frame(&mut server).await.unwrap().as_deref(),
            Some(b"".as_ref())
        );
        assert_eq!(
            read_frame(&mut server).await.unwrap().as_deref(),
            Some(b"chunk two".as_ref())
        );
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        // Length prefix promising more bytes than ever arrive.
        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(b"shor").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let write = tokio::spawn(async move {
            let len = (MAX_FRAME_BYTES as u32) + 1;
            client.write_all(&len.to_be_bytes()).await.unwrap();
        });

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        write.await.unwrap();
    }
}
