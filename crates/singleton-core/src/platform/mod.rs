//! Platform abstraction layer for cross-platform compatibility.
//!
//! This module centralizes all platform-specific code. All `#[cfg]` blocks for
//! OS-specific behavior live here rather than in the naming, arbitration or
//! protocol code.
//!
//! # Architecture
//!
//! - [`Platform`] - capability interface consulted by the guard (session token,
//!   identity normalization, temp directory, stale channel cleanup)
//! - `native` - the build-time selected implementation for the host OS
//! - `channel` - local byte-stream channel (unix socket / named pipe)
//!
//! # Supported Platforms
//!
//! - **Linux / macOS / other unix**: unix domain sockets, uid session token
//! - **Windows**: named pipes, terminal-services session id

pub mod channel;
mod native;

use std::path::PathBuf;

pub use channel::{ChannelAddress, ClientStream, LocalListener, ServerStream};
pub use native::NativePlatform;

/// Host capabilities the guard depends on but does not implement.
///
/// [`NativePlatform`] is the implementation for the running OS. Tests and
/// embedders can supply their own, e.g. to pin the session token.
pub trait Platform: Send + Sync + std::fmt::Debug {
    /// Token keeping endpoint names of different users/sessions apart.
    ///
    /// `None` means the platform has no such token and names carry no suffix.
    fn session_token(&self) -> Option<u32>;

    /// Normalize an identity derived from the executable path.
    ///
    /// Case-insensitive file systems lower-case it so two launches through
    /// differently-cased paths still agree on the name.
    fn normalize_identity(&self, identity: String) -> String {
        identity
    }

    /// Directory holding the lock file (and the socket on unix).
    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    /// Whether a crashed owner can leave a channel artifact behind that makes
    /// the next bind fail with "address in use".
    fn leaves_stale_channels(&self) -> bool;
}

/// The platform implementation for the running OS.
pub fn native() -> &'static NativePlatform {
    static NATIVE: NativePlatform = NativePlatform;
    &NATIVE
}

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
