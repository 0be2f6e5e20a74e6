//! The single-instance guard.
//!
//! A guard decides, once per process, whether this launch is the owner of
//! the application id (it took the lock and serves the channel) or a guest
//! (someone else holds the lock; messages go to them).

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::ipc::{MessageClient, MessageHandler, MessageServer, MessageServerHandle};
use crate::lock::{self, LockHandle};
use crate::naming::{ApplicationIdentity, EndpointName};
use crate::platform::{self, channel, ChannelAddress, NativePlatform, Platform};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of ownership arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the lock and serves the channel.
    Owner,
    /// Another live process is the owner.
    Guest,
}

struct GuardState {
    lock: LockHandle,
    server: Option<MessageServerHandle>,
}

/// Guarantees a single running instance per application id and user session.
///
/// The guard owns its lock and message server for its whole lifetime.
/// Dropping it stops the server, removes the channel artifact and releases
/// the lock, in that order.
///
/// # Example
///
/// ```rust,ignore
/// use singleton_core::{Role, SingleAppGuard};
/// use std::time::Duration;
///
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let guard = SingleAppGuard::builder("com.example.editor").on_message(tx).build();
///
/// match guard.determine_role().await {
///     Role::Owner => while let Some(message) = rx.recv().await { /* raise window */ },
///     Role::Guest => {
///         guard.send_message("activate", Duration::from_secs(5)).await;
///     }
/// }
/// ```
pub struct SingleAppGuard {
    identity: ApplicationIdentity,
    endpoint: EndpointName,
    address: ChannelAddress,
    lock_path: PathBuf,
    lock_timeout: Duration,
    platform: Arc<dyn Platform>,
    handler: Arc<dyn MessageHandler>,
    state: Mutex<GuardState>,
}

impl SingleAppGuard {
    /// Create a guard with default settings.
    ///
    /// An empty `app_id` uses the running executable's path. Messages
    /// received while owner are only logged; use [`SingleAppGuard::builder`]
    /// to install a handler.
    pub fn new(app_id: &str) -> Self {
        Self::builder(app_id).build()
    }

    /// Create a builder for more control over the guard.
    pub fn builder(app_id: impl Into<String>) -> SingleAppGuardBuilder {
        SingleAppGuardBuilder::new(app_id)
    }

    /// Decide whether this process is the owner or a guest.
    ///
    /// Once this process has won it stays owner and no further arbitration
    /// happens. Winning starts the message server; if that fails the process
    /// is still owner but unreachable (see [`SingleAppGuard::is_listening`]).
    pub async fn determine_role(&self) -> Role {
        let mut state = self.state.lock().await;
        if state.lock.is_locked() {
            return Role::Owner;
        }

        match state
            .lock
            .try_lock_for(self.lock_timeout, self.identity.as_str())
            .await
        {
            Ok(()) => {}
            Err(GuardError::LockAcquireTimeout { .. }) => {
                debug!("{} is owned by another process", self.endpoint);
                return Role::Guest;
            }
            Err(e) => {
                warn!("Instance lock unavailable, assuming guest: {}", e);
                return Role::Guest;
            }
        }

        info!("Acquired instance lock {}", self.lock_path.display());
        state.server = self.start_server().await;
        Role::Owner
    }

    /// True if another instance already owns the application id.
    pub async fn is_running(&self) -> bool {
        self.determine_role().await == Role::Guest
    }

    /// Deliver `message` to the owning instance.
    ///
    /// Returns `false` when this process is the owner, when no owner could be
    /// reached, or when the ack did not arrive within `timeout`.
    pub async fn send_message(&self, message: &str, timeout: Duration) -> bool {
        match self.try_send_message(message, timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Message to {} not delivered: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Like [`SingleAppGuard::send_message`], reporting why delivery failed.
    pub async fn try_send_message(&self, message: &str, timeout: Duration) -> Result<()> {
        if self.determine_role().await == Role::Owner {
            return Err(GuardError::NotGuest);
        }
        MessageClient::new(self.address.clone())
            .send(message, timeout)
            .await
    }

    /// True if this process is owner and its channel is bound.
    pub async fn is_listening(&self) -> bool {
        self.state.lock().await.server.is_some()
    }

    /// PID recorded by the current owner, if readable.
    ///
    /// # Platform Behavior
    /// - **Unix**: the lock is advisory, so any process can read the file.
    /// - **Windows**: `LockFileEx` blocks reads through other handles while
    ///   the owner runs, so this returns `None` until the owner exits.
    pub fn owner_pid(&self) -> Option<u32> {
        lock::read_owner_pid(&self.lock_path)
    }

    pub fn application_id(&self) -> &str {
        self.identity.as_str()
    }

    pub fn endpoint_name(&self) -> &EndpointName {
        &self.endpoint
    }

    pub fn channel_address(&self) -> &ChannelAddress {
        &self.address
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn start_server(&self) -> Option<MessageServerHandle> {
        let start = || MessageServer::start(&self.address, self.handler.clone(), &*self.platform);

        let mut result = match start() {
            Err(GuardError::StaleChannelArtifact(path)) => {
                info!("Removing stale channel {}", path.display());
                if let Err(e) = channel::remove_artifact(&self.address) {
                    debug!("Stale channel removal failed: {}", e);
                }
                start()
            }
            other => other,
        };

        // A previous owner's channel is released only when its server task
        // is torn down, which can trail the lock release.
        if !self.platform.leaves_stale_channels() {
            let mut attempt = 1;
            while attempt < GuardConfig::LISTEN_RETRY_ATTEMPTS
                && matches!(result, Err(GuardError::Listen { .. }))
            {
                tokio::time::sleep(GuardConfig::LISTEN_RETRY_INTERVAL).await;
                attempt += 1;
                debug!("Retrying listen on {} (attempt {})", self.address, attempt);
                result = start();
            }
        }

        match result {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(
                    "Listen on {} failed; other launches cannot reach this instance: {}",
                    self.address, e
                );
                None
            }
        }
    }
}

impl Drop for SingleAppGuard {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.server.take();
        state.lock.unlock();
    }
}

/// Builder for configuring a [`SingleAppGuard`].
///
/// # Example
///
/// ```rust,ignore
/// let guard = SingleAppGuard::builder("demo")
///     .temp_dir("/run/user/1000")
///     .lock_timeout(Duration::from_millis(250))
///     .on_message(|message: String| println!("{message}"))
///     .build();
/// ```
pub struct SingleAppGuardBuilder {
    app_id: String,
    temp_dir: Option<PathBuf>,
    lock_timeout: Duration,
    platform: Option<Arc<dyn Platform>>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl SingleAppGuardBuilder {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            temp_dir: None,
            lock_timeout: GuardConfig::LOCK_ACQUIRE_TIMEOUT,
            platform: None,
            handler: None,
        }
    }

    /// Directory for the lock file (and the socket on unix).
    ///
    /// Default: the platform's temp directory. Every launch that should
    /// see the others must use the same directory.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// How long arbitration waits for the lock.
    ///
    /// Default: 500ms, enough to ride out an owner that is shutting down.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Replace the host platform capabilities.
    pub fn platform(mut self, platform: impl Platform + 'static) -> Self {
        self.platform = Some(Arc::new(platform));
        self
    }

    /// Handler invoked for each message received while owner.
    pub fn on_message(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> SingleAppGuard {
        let platform: Arc<dyn Platform> = self.platform.unwrap_or_else(|| Arc::new(NativePlatform));
        let identity = ApplicationIdentity::resolve(&self.app_id, &*platform);
        let endpoint = EndpointName::derive(&identity, &*platform);
        let temp_dir = self.temp_dir.unwrap_or_else(|| platform.temp_dir());
        let address = ChannelAddress::for_endpoint(&endpoint, &temp_dir);
        let lock_path = endpoint.lock_file_path(&temp_dir);

        debug!(
            "Guard for {} on {}: channel {}, lock {}",
            identity.as_str(),
            platform::current_platform(),
            address,
            lock_path.display()
        );

        let handler = self.handler.unwrap_or_else(|| {
            Arc::new(|message: String| {
                info!("Message received with no handler installed: {:?}", message)
            })
        });

        SingleAppGuard {
            identity,
            endpoint,
            address,
            lock_path: lock_path.clone(),
            lock_timeout: self.lock_timeout,
            platform,
            handler,
            state: Mutex::new(GuardState {
                lock: LockHandle::new(lock_path),
                server: None,
            }),
        }
    }
}
