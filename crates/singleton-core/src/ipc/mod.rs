//! Local IPC between the owner and guest instances.
//!
//! One framed UTF-8 message per connection over the platform's local channel
//! (unix domain socket or named pipe), answered with a raw `ack`.
//!
//! # Architecture
//!
//! - **Server**: Runs on the owner, services one connection at a time, hands messages to a [`MessageHandler`]
//! - **Client**: Used by a guest to deliver a message and wait for the ack
//! - **Protocol**: Shared framing used by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::MessageClient;
pub use protocol::{encode_message, read_ack, read_message, write_ack};
pub use server::{ConnectionSession, MessageHandler, MessageServer, MessageServerHandle};
