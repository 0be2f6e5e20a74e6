//! Host OS implementation of [`Platform`].

use super::Platform;
use std::sync::OnceLock;

/// Platform capabilities of the OS this crate was built for.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePlatform;

impl Platform for NativePlatform {
    /// Fetched once per process and cached.
    fn session_token(&self) -> Option<u32> {
        static SESSION_TOKEN: OnceLock<Option<u32>> = OnceLock::new();
        *SESSION_TOKEN.get_or_init(query_session_token)
    }

    fn normalize_identity(&self, identity: String) -> String {
        #[cfg(windows)]
        {
            identity.to_lowercase()
        }
        #[cfg(not(windows))]
        {
            identity
        }
    }

    fn leaves_stale_channels(&self) -> bool {
        // Named pipes vanish with their last handle; socket files do not.
        cfg!(unix)
    }
}

/// Query the per-user/session token from the OS.
///
/// # Platform Behavior
/// - **Unix**: real user id
/// - **Windows**: terminal-services session id of the current process
fn query_session_token() -> Option<u32> {
    #[cfg(unix)]
    {
        Some(nix::unistd::getuid().as_raw())
    }

    #[cfg(windows)]
    {
        Some(windows_session_id())
    }

    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn windows_session_id() -> u32 {
    use windows_sys::Win32::System::RemoteDesktop::ProcessIdToSessionId;
    use windows_sys::Win32::System::Threading::GetCurrentProcessId;

    let mut session_id: u32 = 0;
    // SAFETY: `session_id` is a live local; the call writes one DWORD through it.
    let ok = unsafe { ProcessIdToSessionId(GetCurrentProcessId(), &mut session_id) };
    if ok == 0 {
        tracing::warn!(
            "ProcessIdToSessionId failed ({}); using session 0",
            std::io::Error::last_os_error()
        );
    }
    session_id
}
