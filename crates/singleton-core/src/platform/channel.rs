//! Local byte-stream channel between instances.
//!
//! # Platform Behavior
//! - **Unix**: a unix domain socket file at `{temp_dir}/{endpoint}`
//! - **Windows**: a named pipe at `\\.\pipe\{endpoint}`
//!
//! Both sides see plain `AsyncRead + AsyncWrite` streams, so the protocol
//! code is shared.

use crate::naming::EndpointName;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub use imp::{connect, ClientStream, LocalListener, ServerStream};

/// Location of an owner's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    path: PathBuf,
}

impl ChannelAddress {
    /// Channel address for an endpoint name.
    pub fn for_endpoint(name: &EndpointName, temp_dir: &Path) -> Self {
        #[cfg(windows)]
        {
            let _ = temp_dir;
            Self {
                path: PathBuf::from(format!(r"\\.\pipe\{}", name)),
            }
        }
        #[cfg(not(windows))]
        {
            Self {
                path: temp_dir.join(name.as_str()),
            }
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Delete a channel artifact left behind by a dead owner.
///
/// Only meaningful where [`Platform::leaves_stale_channels`] holds.
///
/// [`Platform::leaves_stale_channels`]: super::Platform::leaves_stale_channels
pub fn remove_artifact(address: &ChannelAddress) -> io::Result<()> {
    match std::fs::remove_file(address.as_path()) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
mod imp {
    use super::ChannelAddress;
    use std::io;
    use tokio::net::{UnixListener, UnixStream};

    pub type ServerStream = UnixStream;
    pub type ClientStream = UnixStream;

    /// Listening side of the channel.
    #[derive(Debug)]
    pub struct LocalListener {
        inner: UnixListener,
    }

    impl LocalListener {
        /// Bind the channel. Must run inside a tokio runtime.
        pub fn bind(address: &ChannelAddress) -> io::Result<Self> {
            let inner = UnixListener::bind(address.as_path())?;
            Ok(Self { inner })
        }

        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    /// Open a connection to a listening owner.
    pub async fn connect(address: &ChannelAddress) -> io::Result<ClientStream> {
        UnixStream::connect(address.as_path()).await
    }
}

#[cfg(windows)]
mod imp {
    use super::ChannelAddress;
    use std::io;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    pub type ServerStream = NamedPipeServer;
    pub type ClientStream = NamedPipeClient;

    const ERROR_PIPE_BUSY: i32 = 231;
    const PIPE_BUSY_BACKOFF: Duration = Duration::from_millis(50);

    /// Listening side of the channel.
    ///
    /// Always keeps one unconnected pipe instance open so the name stays
    /// reachable between accepts.
    #[derive(Debug)]
    pub struct LocalListener {
        name: String,
        pending: NamedPipeServer,
    }

    impl LocalListener {
        /// Bind the channel. Must run inside a tokio runtime.
        pub fn bind(address: &ChannelAddress) -> io::Result<Self> {
            let name = address.to_string();
            let pending = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&name)?;
            Ok(Self { name, pending })
        }

        /// Wait for the next client.
        ///
        /// A failed connect (e.g. the client gave up before being served)
        /// leaves the pending instance unusable, so it is replaced before the
        /// error is returned.
        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            if let Err(e) = self.pending.connect().await {
                self.pending = ServerOptions::new().create(&self.name)?;
                return Err(e);
            }
            let next = ServerOptions::new().create(&self.name)?;
            Ok(std::mem::replace(&mut self.pending, next))
        }
    }

    /// Open a connection to a listening owner.
    ///
    /// All instances busy is not a failure; the caller's timeout bounds the wait.
    pub async fn connect(address: &ChannelAddress) -> io::Result<ClientStream> {
        let name = address.to_string();
        loop {
            match ClientOptions::new().open(&name) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(PIPE_BUSY_BACKOFF).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::naming::{ApplicationIdentity, EndpointName};
    use crate::platform::native;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn address_in(dir: &TempDir, id: &str) -> ChannelAddress {
        let identity = ApplicationIdentity::resolve(id, native());
        let name = EndpointName::derive(&identity, native());
        ChannelAddress::for_endpoint(&name, dir.path())
    }

    #[test]
    fn test_address_lives_in_temp_dir() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "demo");

        assert_eq!(address.as_path().parent(), Some(dir.path()));
        assert!(address.to_string().contains("qtsingleapp-demo-"));
    }

    #[tokio::test]
    async fn test_bind_connect_and_exchange_bytes() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "exchange");
        let mut listener = LocalListener::bind(&address).unwrap();

        let mut client = connect(&address).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_rebind_over_leftover_socket_is_addr_in_use() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "leftover");

        let first = LocalListener::bind(&address).unwrap();
        drop(first);

        // The socket file outlives the listener, as after a crash.
        assert!(address.as_path().exists());
        let err = LocalListener::bind(&address).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        remove_artifact(&address).unwrap();
        assert!(LocalListener::bind(&address).is_ok());
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails_fast() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "nobody");

        assert!(connect(&address).await.is_err());
    }

    #[test]
    fn test_remove_missing_artifact_is_ok() {
        let dir = TempDir::new().unwrap();
        let address = address_in(&dir, "missing");

        assert!(remove_artifact(&address).is_ok());
    }
}

#[cfg(all(test, windows))]
mod windows_tests {
    use super::*;
    use crate::naming::{ApplicationIdentity, EndpointName};
    use crate::platform::native;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn unique_address(id: &str) -> ChannelAddress {
        // Pipe names are global, not scoped to a directory
        let id = format!("{}-{}", id, std::process::id());
        let identity = ApplicationIdentity::resolve(&id, native());
        let name = EndpointName::derive(&identity, native());
        ChannelAddress::for_endpoint(&name, &std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_listener_survives_abandoned_client() {
        let address = unique_address("abandoned");
        let mut listener = LocalListener::bind(&address).unwrap();

        // Client gives up before the listener gets to it
        drop(connect(&address).await.unwrap());
        let _ = tokio::time::timeout(Duration::from_secs(1), listener.accept()).await;

        let mut client = connect(&address).await.unwrap();
        let mut server = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .unwrap()
            .unwrap();

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }
}
