//! Centralized configuration for the single-instance guard.
//!
//! Timeouts and naming constants shared by arbitration, the message server
//! and the message client. Runtime overrides go through
//! [`SingleAppGuardBuilder`](crate::SingleAppGuardBuilder).

use std::time::Duration;

/// Guard-level configuration: naming and ownership arbitration.
pub struct GuardConfig;

impl GuardConfig {
    /// Prefix shared by every channel name.
    pub const CHANNEL_PREFIX: &'static str = "qtsingleapp-";
    /// Suffix appended to the endpoint name to form the lock file name.
    pub const LOCKFILE_SUFFIX: &'static str = "-lockfile";
    /// Maximum number of letters taken from the identity for the readable prefix.
    pub const NAME_PREFIX_LEN: usize = 6;

    // Arbitration
    pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);
    pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// Binds retried after winning the lock where the previous owner's
    /// channel can linger briefly (named pipes closing after the lock).
    pub const LISTEN_RETRY_ATTEMPTS: u32 = 8;
    pub const LISTEN_RETRY_INTERVAL: Duration = Duration::from_millis(25);

    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(5000);
}

/// Wire protocol configuration.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Acknowledgment token, sent raw with no length prefix.
    pub const ACK: &'static [u8] = b"ack";
    pub const LENGTH_PREFIX_LEN: usize = 4;

    // Server side
    pub const HEADER_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const READ_CHUNK_TIMEOUT: Duration = Duration::from_millis(2000);
    pub const ACK_FLUSH_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const PEER_DISCONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

    // Client side
    pub const CONNECT_ATTEMPTS: u32 = 2;
    pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

    /// Upper bound on a single up-front buffer reservation while decoding.
    /// Larger payloads still decode; the buffer just grows as bytes arrive.
    pub const MAX_INITIAL_RESERVE: usize = 64 * 1024;
}
