//! WebRTC transport for peercall
//!
//! Implements the call core's transport traits on top of `webrtc-rs`:
//!
//! - [`WebRtcTransportFactory`]: one `API` (default codecs and interceptors),
//!   a fresh `RTCPeerConnection` per call
//! - [`WebRtcPeerTransport`]: offer/answer, ICE and track plumbing; connection
//!   state, remote tracks and local candidates are reported as
//!   `TransportEvent`s
//! - [`SampleTrackSource`]: a `MediaSource` handing out [`SampleTrack`]s that
//!   the application feeds with encoded Opus/VP8 frames
//!
//! # Example
//!
//! ```no_run
//! use peercall_core::{CallConfig, CallController};
//! use peercall_webrtc::{SampleTrackSource, WebRtcTransportFactory};
//! use std::sync::Arc;
//!
//! # fn main() -> peercall_core::Result<()> {
//! let controller = CallController::new(
//!     CallConfig::default(),
//!     Arc::new(WebRtcTransportFactory::new()?),
//!     Arc::new(SampleTrackSource::new("cli")),
//! )?;
//! # let _ = controller;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod media;
pub mod peer;

pub use media::{RemoteTrack, SampleTrack, SampleTrackSource};
pub use peer::{WebRtcPeerTransport, WebRtcTransportFactory};
