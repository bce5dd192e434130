//! peercall core
//!
//! Transport-agnostic building blocks for one-to-one calls negotiated over a
//! user-addressed signaling relay:
//!
//! - [`signaling`]: the relay capability and the call wire protocol
//! - [`media`]: local capture and read-only media views
//! - [`peer`]: the transport handle abstraction and [`PeerSession`], which
//!   orders the offer/answer exchange and buffers early ICE candidates
//! - [`call`]: [`CallController`], the actor that drives a call from request
//!   to teardown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  CallController (engine task)                │
//! │  ├─ SignalingChannel  (call:* events)        │
//! │  ├─ MediaSource       (acquire / release)    │
//! │  └─ CallSession                              │
//! │      └─ PeerSession                          │
//! │          ├─ pending remote candidates (FIFO) │
//! │          └─ PeerTransport (TransportFactory) │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Concrete transports live in sibling crates (`peercall-webrtc`,
//! `peercall-socketio`).

#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;

pub use call::{CallController, CallEvent, CallState, EndReason};
pub use config::{CallConfig, IceServer, TransportConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{LocalMedia, MediaConstraints, MediaKind, MediaSource, MediaTrack, MediaView};
pub use peer::{
    CallRole, CandidateDisposition, ConnectionState, PeerSession, PeerTransport, SenderId,
    TransportEvent, TransportEventHandler, TransportFactory,
};
pub use signaling::{
    IceCandidate, InboundSignal, SdpType, SessionDescription, SignalEvent, SignalHandler,
    SignalingChannel, SubscriptionId,
};

/// Identity of a user as known to the signaling relay
pub type UserId = String;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version
pub fn version() -> &'static str {
    VERSION
}
