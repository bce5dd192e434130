//! Socket.io signaling channel for peercall
//!
//! Connects to the chat relay the browser client uses and carries the
//! `call:*` events for [`peercall_core::CallController`].
//!
//! # Example
//!
//! ```no_run
//! use peercall_socketio::{SignalingConfig, SocketIoSignaling};
//!
//! # let _ = tokio_test::block_on(async {
//! let config = SignalingConfig::new("https://chat.example.com").with_token("jwt");
//! let signaling = SocketIoSignaling::new(config)?;
//! signaling.connect().await?;
//! # Ok::<(), peercall_core::Error>(())
//! # });
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod packet;

pub use client::SocketIoSignaling;
pub use config::SignalingConfig;
pub use packet::{Handshake, Packet};
