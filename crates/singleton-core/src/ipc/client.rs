//! Message client used by guest instances.
//!
//! Connects to the owner's channel, sends one framed message and waits for
//! the `ack`. Connecting is retried once after a short pause, which covers an
//! owner that holds the lock but has not bound its listener yet.

use super::protocol::{encode_message, read_ack};
use crate::config::ProtocolConfig;
use crate::error::{GuardError, Result};
use crate::platform::channel::{self, ChannelAddress, ClientStream};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Client for one owner channel.
#[derive(Debug, Clone)]
pub struct MessageClient {
    address: ChannelAddress,
}

impl MessageClient {
    pub fn new(address: ChannelAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Deliver `message` and wait for the owner's ack.
    ///
    /// Each connect attempt is bounded by `timeout / 2`; the write flush and
    /// the ack wait by `timeout` each.
    pub async fn send(&self, message: &str, timeout: Duration) -> Result<()> {
        let frame = encode_message(message)?;
        let mut stream = self.connect(timeout / 2).await?;

        tokio::time::timeout(timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| GuardError::WriteTimeout(timeout))??;

        read_ack(&mut stream, timeout).await?;
        debug!("Delivered {} bytes to {}", message.len(), self.address);
        Ok(())
    }

    async fn connect(&self, per_attempt: Duration) -> Result<ClientStream> {
        let attempts = ProtocolConfig::CONNECT_ATTEMPTS;
        for attempt in 1..=attempts {
            match tokio::time::timeout(per_attempt, channel::connect(&self.address)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    debug!("Connect attempt {} to {} failed: {}", attempt, self.address, e)
                }
                Err(_) => debug!(
                    "Connect attempt {} to {} timed out after {:?}",
                    attempt, self.address, per_attempt
                ),
            }
            if attempt < attempts {
                // The owner may be between taking the lock and binding.
                tokio::time::sleep(ProtocolConfig::CONNECT_RETRY_DELAY).await;
            }
        }

        Err(GuardError::ConnectFailure {
            address: self.address.to_string(),
            attempts,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::server::MessageServer;
    use crate::naming::{ApplicationIdentity, EndpointName};
    use crate::platform::{native, LocalListener};
    use bytes::BytesMut;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn address_in(dir: &TempDir, id: &str) -> ChannelAddress {
        let identity = ApplicationIdentity::resolve(id, native());
        ChannelAddress::for_endpoint(&EndpointName::derive(&identity, native()), dir.path())
    }

    #[tokio::test]
    async fn test_send_to_running_server() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "client");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _server = MessageServer::start(&address, Arc::new(tx), native()).unwrap();

        let client = MessageClient::new(address);
        client.send("activate", Duration::from_secs(5)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "activate");
    }

    #[tokio::test]
    async fn test_no_listener_fails_after_two_attempts() {
        let dir = TempDir::new().unwrap();
        let client = MessageClient::new(address_in(&dir, "absent"));

        let started = std::time::Instant::now();
        let err = client
            .send("ping", Duration::from_millis(1000))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::ConnectFailure { attempts: 2, .. }));
        assert!(started.elapsed() >= ProtocolConfig::CONNECT_RETRY_DELAY);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retry_reaches_late_listener() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "late");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let server_address = address.clone();
        let late_server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            MessageServer::start(&server_address, Arc::new(tx), native()).unwrap()
        });

        let client = MessageClient::new(address);
        client.send("activate", Duration::from_secs(2)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "activate");
        drop(late_server.await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_reply_is_ack_mismatch() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "liar");
        let mut listener = LocalListener::bind(&address).unwrap();

        let owner = tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let message = crate::ipc::protocol::read_message(
                &mut stream,
                &mut buf,
                Duration::from_secs(1),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
            stream.write_all(b"nak").await.unwrap();
            message
        });

        let err = MessageClient::new(address)
            .send("hello", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::AckMismatch { .. }));
        assert_eq!(owner.await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_silent_owner_times_out() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "silent");
        let mut listener = LocalListener::bind(&address).unwrap();

        let owner = tokio::spawn(async move {
            // Accept, never answer, keep the connection open
            let stream = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(stream);
        });

        let err = MessageClient::new(address)
            .send("hello", Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::ReadTimeout(_)));
        owner.await.unwrap();
    }
}
