//! Message server run by the owning instance.
//!
//! Listens on the endpoint channel and services one connection at a time:
//! read one framed message, hand it to the [`MessageHandler`], reply `ack`,
//! give the guest a moment to read it, close.
//!
//! # Thread Safety
//!
//! The accept loop is a single task on the embedding tokio runtime. Every
//! wait inside a session is bounded, so a stuck guest delays the next one by
//! at most the protocol timeouts.

use super::protocol::{read_message, write_ack};
use crate::config::ProtocolConfig;
use crate::error::{GuardError, Result};
use crate::platform::channel::{self, ChannelAddress, LocalListener};
use crate::platform::Platform;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Receives messages delivered to the owning instance.
///
/// Called synchronously from the server task, exactly once per successfully
/// decoded connection and before the guest is acknowledged. Keep it short;
/// forward to a channel for anything slow.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: String);
}

impl<F> MessageHandler for F
where
    F: Fn(String) + Send + Sync + 'static,
{
    fn on_message(&self, message: String) {
        self(message)
    }
}

impl MessageHandler for mpsc::UnboundedSender<String> {
    fn on_message(&self, message: String) {
        if self.send(message).is_err() {
            debug!("Message receiver dropped; discarding message");
        }
    }
}

/// Handle to a running message server. Dropping shuts it down.
#[derive(Debug)]
pub struct MessageServerHandle {
    address: ChannelAddress,
    remove_artifact_on_drop: bool,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MessageServerHandle {
    /// Address the server is listening on.
    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Stop accepting connections.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MessageServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        if self.remove_artifact_on_drop {
            if let Err(e) = channel::remove_artifact(&self.address) {
                debug!("Could not remove channel {}: {}", self.address, e);
            }
        }
    }
}

/// Message server bound to an endpoint channel.
pub struct MessageServer;

impl MessageServer {
    /// Bind `address` and start serving in a background task.
    ///
    /// An address-in-use failure on a platform that leaves socket files
    /// behind is reported as [`GuardError::StaleChannelArtifact`] so the
    /// caller can clean up and retry.
    pub fn start(
        address: &ChannelAddress,
        handler: Arc<dyn MessageHandler>,
        platform: &dyn Platform,
    ) -> Result<MessageServerHandle> {
        let listener = LocalListener::bind(address).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse && platform.leaves_stale_channels() {
                GuardError::StaleChannelArtifact(address.as_path().to_path_buf())
            } else {
                GuardError::Listen {
                    address: address.to_string(),
                    message: e.to_string(),
                    source: Some(e),
                }
            }
        })?;

        info!("Message server listening on {}", address);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::accept_loop(listener, handler, shutdown_rx));

        Ok(MessageServerHandle {
            address: address.clone(),
            remove_artifact_on_drop: platform.leaves_stale_channels(),
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        mut listener: LocalListener,
        handler: Arc<dyn MessageHandler>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut session_id: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Message server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok(stream) => {
                            session_id += 1;
                            ConnectionSession::new(session_id, stream).serve(&*handler).await;
                        }
                        Err(e) => {
                            error!("Local channel accept error: {}", e);
                            tokio::time::sleep(ProtocolConfig::ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }
}

/// State of one inbound connection while its message is read and acked.
pub struct ConnectionSession<S> {
    id: u64,
    stream: S,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionSession<S> {
    pub fn new(id: u64, stream: S) -> Self {
        Self {
            id,
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Run the session to completion. Consumes and releases it on every path.
    ///
    /// Returns whether a message reached the handler.
    pub async fn serve(mut self, handler: &dyn MessageHandler) -> bool {
        let message = match read_message(
            &mut self.stream,
            &mut self.buf,
            ProtocolConfig::HEADER_WAIT_TIMEOUT,
            ProtocolConfig::READ_CHUNK_TIMEOUT,
        )
        .await
        {
            Ok(message) => message,
            Err(GuardError::PeerDisconnected { received, expected }) => {
                warn!(
                    "Session {}: peer disconnected after {} of {} bytes",
                    self.id, received, expected
                );
                return false;
            }
            Err(e) => {
                warn!("Session {}: message reception failed: {}", self.id, e);
                return false;
            }
        };

        debug!("Session {}: received {} bytes", self.id, message.len());
        handler.on_message(message);

        if let Err(e) = self.acknowledge().await {
            debug!("Session {}: ack not confirmed: {}", self.id, e);
        }
        true
    }

    /// Send the ack, then wait briefly for the guest to hang up so it has
    /// read the ack before the connection is torn down.
    async fn acknowledge(&mut self) -> Result<()> {
        let flush_timeout = ProtocolConfig::ACK_FLUSH_TIMEOUT;
        tokio::time::timeout(flush_timeout, async {
            write_ack(&mut self.stream).await?;
            self.stream.flush().await?;
            Ok::<_, GuardError>(())
        })
        .await
        .map_err(|_| GuardError::WriteTimeout(flush_timeout))??;

        let disconnect_timeout = ProtocolConfig::PEER_DISCONNECT_TIMEOUT;
        tokio::time::timeout(disconnect_timeout, async {
            let mut scratch = [0u8; 64];
            while self.stream.read(&mut scratch).await? > 0 {}
            Ok::<_, GuardError>(())
        })
        .await
        .map_err(|_| GuardError::ReadTimeout(disconnect_timeout))?
    }
}
