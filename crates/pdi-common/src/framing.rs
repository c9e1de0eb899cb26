//! Length-prefixed control-plane framing
//!
//! Every control-plane message is a 4-byte big-endian length prefix
//! followed by exactly that many UTF-8 bytes. The codec imposes no
//! schema on the payload; payload semantics live above the framing
//! layer (see [`crate::types::ControlPayload`]).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PdiError, Result};

/// Upper bound on a single frame payload. Anything larger is treated
/// as a framing error rather than an allocation request.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Write one framed message to `stream`.
pub async fn write_message<S>(stream: &mut S, text: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let payload = text.as_bytes();
    if payload.len() > MAX_FRAME_BYTES {
        return Err(PdiError::Framing(format!(
            "outbound frame of {} bytes exceeds limit of {}",
            payload.len(),
            MAX_FRAME_BYTES
        )));
    }

    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed message from `stream`.
///
/// Returns `Ok(None)` on a clean disconnect (EOF before any length
/// byte). A stream that closes mid-length or mid-payload is a
/// [`PdiError::Framing`] error: the frame was promised and never
/// delivered, so the connection must be considered broken.
pub async fn read_message<S>(stream: &mut S) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0usize;

    while filled < len_buf.len() {
        let n = stream.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(PdiError::Framing(format!(
                "stream closed after {} of 4 length bytes",
                filled
            )));
        }
        filled += n;
    }

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_BYTES {
        return Err(PdiError::Framing(format!(
            "declared frame of {} bytes exceeds limit of {}",
            msg_len, MAX_FRAME_BYTES
        )));
    }

    let mut payload = vec![0u8; msg_len];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PdiError::Framing(format!(
                "stream closed mid-payload (expected {} bytes)",
                msg_len
            ))
        } else {
            PdiError::Io(e)
        }
    })?;

    let text = String::from_utf8(payload)
        .map_err(|e| PdiError::Framing(format!("payload is not valid UTF-8: {}", e)))?;

    Ok(Some(text))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_lengths() {
        // Empty, single byte, and a 64 KiB frame all survive intact.
        for len in [0usize, 1, 65536] {
            let message = "x".repeat(len);
            let (mut client, mut server) = tokio::io::duplex(MAX_FRAME_BYTES + 8);

            write_message(&mut client, &message).await.unwrap();
            let read = read_message(&mut server).await.unwrap();
            assert_eq!(read.as_deref(), Some(message.as_str()));
        }
    }

    #[tokio::test]
    async fn test_clean_disconnect_is_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_message(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_length_prefix_without_payload_is_framing_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Promise 5 bytes, deliver none.
        tokio::io::AsyncWriteExt::write_all(&mut client, &5u32.to_be_bytes())
            .await
            .unwrap();
        drop(client);

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, PdiError::Framing(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn test_partial_length_is_framing_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0u8, 0])
            .await
            .unwrap();
        drop(client);

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, PdiError::Framing(_)));
    }

    #[tokio::test]
    async fn test_oversized_declared_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = (MAX_FRAME_BYTES as u32) + 1;
        tokio::io::AsyncWriteExt::write_all(&mut client, &huge.to_be_bytes())
            .await
            .unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, PdiError::Framing(_)));
    }
}
