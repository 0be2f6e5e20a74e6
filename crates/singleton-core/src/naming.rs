//! Deterministic endpoint naming.
//!
//! Every launch of the same application by the same user must arrive at the
//! same lock file and channel without talking to anyone first, so the name
//! is a pure function of the application identity and the platform's session
//! token:
//!
//! ```text
//! qtsingleapp-{up to 6 letters}-{crc16 hex}[-{session token hex}]
//! ```

use crate::config::GuardConfig;
use crate::platform::Platform;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The identity an instance is unique by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity {
    id: String,
    /// Text the readable name prefix is taken from: the explicit id, or the
    /// executable's file name when the id was derived from its path.
    prefix_source: String,
}

impl ApplicationIdentity {
    /// Resolve the identity for an application id.
    ///
    /// An empty id falls back to the running executable's path, normalized
    /// by the platform.
    pub fn resolve(app_id: &str, platform: &dyn Platform) -> Self {
        if !app_id.is_empty() {
            return Self {
                id: app_id.to_string(),
                prefix_source: app_id.to_string(),
            };
        }

        let exe_path = match std::env::current_exe() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("Could not determine executable path for identity: {}", e);
                String::new()
            }
        };
        let id = platform.normalize_identity(exe_path);
        let prefix_source = id
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or_default()
            .to_string();

        Self { id, prefix_source }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

/// Name shared by the lock file and the listening channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointName(String);

impl EndpointName {
    /// Derive the endpoint name for an identity.
    pub fn derive(identity: &ApplicationIdentity, platform: &dyn Platform) -> Self {
        let letters: String = identity
            .prefix_source
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .take(GuardConfig::NAME_PREFIX_LEN)
            .collect();

        let mut name = format!(
            "{}{}-{:x}",
            GuardConfig::CHANNEL_PREFIX,
            letters,
            checksum16(identity.id.as_bytes())
        );
        if let Some(token) = platform.session_token() {
            name.push_str(&format!("-{:x}", token));
        }

        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the lock file for this endpoint.
    pub fn lock_file_path(&self, temp_dir: &Path) -> PathBuf {
        temp_dir.join(format!("{}{}", self.0, GuardConfig::LOCKFILE_SUFFIX))
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CRC-16/X-25 (ISO 3309) over `data`.
pub fn checksum16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    !crc
}
