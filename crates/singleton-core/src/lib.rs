//! Singleton Core - single-instance guard for desktop applications.
//!
//! The first launch of an application id becomes the owner: it holds an
//! exclusive lock file and listens on a local channel. Later launches find the
//! lock taken, become guests, and can forward a message (typically their
//! command line) to the owner before exiting.
//!
//! # Example
//!
//! ```rust,ignore
//! use singleton_core::{Role, SingleAppGuard};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let guard = SingleAppGuard::builder("com.example.editor")
//!         .on_message(tx)
//!         .build();
//!
//!     if guard.is_running().await {
//!         let args = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
//!         guard.send_message(&args, Duration::from_secs(5)).await;
//!         return;
//!     }
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("another launch asked for: {message}");
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod lock;
pub mod naming;
pub mod platform;

mod guard;

pub use config::{GuardConfig, ProtocolConfig};
pub use error::{GuardError, Result};
pub use guard::{Role, SingleAppGuard, SingleAppGuardBuilder};
pub use ipc::{MessageClient, MessageHandler, MessageServer, MessageServerHandle};
pub use lock::LockHandle;
pub use naming::{ApplicationIdentity, EndpointName};
pub use platform::{ChannelAddress, NativePlatform, Platform};
