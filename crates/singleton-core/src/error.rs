//! Error types for the single-instance guard.
//!
//! None of these cross the client/server boundary: the public surface
//! collapses them into a role, a `bool`, or a log line. They exist so the
//! internals can use `?` and so `try_send_message` can report a cause.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for guard operations.
#[derive(Debug, Error)]
pub enum GuardError {
    // Arbitration
    #[error("Instance lock {path:?} not acquired within {waited:?}")]
    LockAcquireTimeout { path: PathBuf, waited: Duration },

    #[error("Failed to listen on {address}: {message}")]
    Listen {
        address: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Stale channel artifact at {0:?}")]
    StaleChannelArtifact(PathBuf),

    // Delivery
    #[error("Failed to connect to {address} after {attempts} attempt(s)")]
    ConnectFailure { address: String, attempts: u32 },

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("Acknowledgment mismatch: received {received:?}")]
    AckMismatch { received: Vec<u8> },

    #[error("Peer disconnected after {received} of {expected} bytes")]
    PeerDisconnected { received: usize, expected: usize },

    #[error("Message of {0} bytes does not fit the 32-bit length prefix")]
    MessageTooLarge(usize),

    #[error("Message payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("This process owns the instance; it cannot message itself")]
    NotGuest,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        GuardError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl GuardError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GuardError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True for failures caused by a bounded wait running out.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GuardError::LockAcquireTimeout { .. }
                | GuardError::WriteTimeout(_)
                | GuardError::ReadTimeout(_)
        )
    }
}
