//! Wire format between a guest and the owner.
//!
//! One message per connection, one reply:
//!
//! ```text
//! guest -> owner: [u32 BE: len][UTF-8 bytes of len]
//! owner -> guest: b"ack"
//! ```
//!
//! The ack carries no length prefix; the guest compares the raw bytes.

use crate::config::ProtocolConfig;
use crate::error::{GuardError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode a message as a length-prefixed frame.
pub fn encode_message(message: &str) -> Result<Bytes> {
    let payload = message.as_bytes();
    let len = u32::try_from(payload.len())
        .map_err(|_| GuardError::MessageTooLarge(payload.len()))?;

    let mut frame = BytesMut::with_capacity(ProtocolConfig::LENGTH_PREFIX_LEN + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Read one framed message, accumulating partial deliveries.
///
/// `header_timeout` bounds each wait for the length prefix, `chunk_timeout`
/// each wait for more payload bytes. EOF before the declared length is
/// reached fails with `PeerDisconnected`; nothing partial is returned.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    header_timeout: Duration,
    chunk_timeout: Duration,
) -> Result<String> {
    fill_to(reader, buf, ProtocolConfig::LENGTH_PREFIX_LEN, header_timeout).await?;
    let expected = buf.get_u32() as usize;

    buf.reserve(
        expected
            .saturating_sub(buf.len())
            .min(ProtocolConfig::MAX_INITIAL_RESERVE),
    );
    fill_to(reader, buf, expected, chunk_timeout).await?;

    let payload = buf.split_to(expected);
    Ok(String::from_utf8(payload.to_vec())?)
}

async fn fill_to<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    target: usize,
    wait: Duration,
) -> Result<()> {
    while buf.len() < target {
        let read = tokio::time::timeout(wait, reader.read_buf(buf))
            .await
            .map_err(|_| GuardError::ReadTimeout(wait))??;
        if read == 0 {
            return Err(GuardError::PeerDisconnected {
                received: buf.len(),
                expected: target,
            });
        }
    }
    Ok(())
}

/// Write the ack token.
pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(ProtocolConfig::ACK).await?;
    Ok(())
}

/// Wait up to `timeout` for the ack token and check it byte for byte.
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R, timeout: Duration) -> Result<()> {
    let expected = ProtocolConfig::ACK.len();
    let mut received = Vec::with_capacity(expected);
    tokio::time::timeout(
        timeout,
        (&mut *reader).take(expected as u64).read_to_end(&mut received),
    )
    .await
    .map_err(|_| GuardError::ReadTimeout(timeout))??;

    if received.len() < expected {
        return Err(GuardError::PeerDisconnected {
            received: received.len(),
            expected,
        });
    }
    if received != ProtocolConfig::ACK {
        return Err(GuardError::AckMismatch { received });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const WAIT: Duration = Duration::from_millis(500);

    async fn decode(bytes: &[u8]) -> Result<String> {
        let mut cursor = std::io::Cursor::new(bytes.to_vec());
        let mut buf = BytesMut::new();
        read_message(&mut cursor, &mut buf, WAIT, WAIT).await
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode_message("activate").unwrap();

        assert_eq!(&frame[..4], &[0, 0, 0, 8]);
        assert_eq!(&frame[4..], b"activate");
    }

    #[tokio::test]
    async fn test_decode_multibyte_utf8() {
        let text = "grüße, 世界 🎉";
        let frame = encode_message(text).unwrap();

        assert_eq!(&frame[..4], &(text.len() as u32).to_be_bytes());
        assert_eq!(decode(&frame).await.unwrap(), text);
    }

    #[tokio::test]
    async fn test_decode_empty_message() {
        let frame = encode_message("").unwrap();

        assert_eq!(frame.len(), 4);
        assert_eq!(decode(&frame).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_decode_accumulates_partial_deliveries() {
        let (mut client, mut server) = duplex(64);
        let frame = encode_message("open /home/user/notes.txt").unwrap();

        let writer = tokio::spawn(async move {
            // Split inside the prefix and inside the payload
            for chunk in [&frame[..2], &frame[2..7], &frame[7..]] {
                client.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            client
        });

        let mut buf = BytesMut::new();
        let message = read_message(&mut server, &mut buf, WAIT, WAIT).await.unwrap();
        assert_eq!(message, "open /home/user/notes.txt");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_before_prefix_is_peer_disconnected() {
        let err = decode(&[0, 0]).await.unwrap_err();
        assert!(matches!(
            err,
            GuardError::PeerDisconnected {
                received: 2,
                expected: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_rejected() {
        let frame = encode_message("activate").unwrap();
        let err = decode(&frame[..8]).await.unwrap_err();

        assert!(matches!(
            err,
            GuardError::PeerDisconnected {
                received: 4,
                expected: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_rejected() {
        let err = decode(&[0, 0, 0, 2, 0xc3, 0x28]).await.unwrap_err();
        assert!(matches!(err, GuardError::InvalidUtf8(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_payload_times_out() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0, 0, 10, b'a', b'b']).await.unwrap();

        let mut buf = BytesMut::new();
        let err = read_message(&mut server, &mut buf, WAIT, ProtocolConfig::READ_CHUNK_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::ReadTimeout(d) if d == ProtocolConfig::READ_CHUNK_TIMEOUT));
        drop(client);
    }

    #[tokio::test]
    async fn test_ack_roundtrip() {
        let (mut client, mut server) = duplex(8);

        write_ack(&mut server).await.unwrap();
        assert!(read_ack(&mut client, WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_ack_is_mismatch() {
        let mut cursor = std::io::Cursor::new(b"nak".to_vec());
        let err = read_ack(&mut cursor, WAIT).await.unwrap_err();

        assert!(matches!(err, GuardError::AckMismatch { received } if received == b"nak"));
    }

    #[tokio::test]
    async fn test_missing_ack_is_peer_disconnected() {
        let mut cursor = std::io::Cursor::new(b"ac".to_vec());
        let err = read_ack(&mut cursor, WAIT).await.unwrap_err();

        assert!(matches!(
            err,
            GuardError::PeerDisconnected {
                received: 2,
                expected: 3
            }
        ));
    }
}
