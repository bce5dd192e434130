//! Transport handle abstraction
//!
//! A `PeerTransport` is one negotiated peer-to-peer media session (the
//! equivalent of a browser `RTCPeerConnection`). Implementations live in the
//! transport crates; the core only drives them through this surface.

use crate::config::TransportConfig;
use crate::media::MediaTrack;
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport allocated, negotiation not started
    New,
    /// Descriptions being exchanged or ICE checks in progress
    Negotiating,
    /// Connection established successfully
    Connected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

impl ConnectionState {
    /// Whether this state ends the call
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Identifier of a track sender inside a transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(pub String);

/// Events emitted by a transport handle
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection state transition
    StateChanged(ConnectionState),
    /// Remote party added a track
    RemoteTrack {
        /// Stream the track belongs to
        stream_id: String,
        /// The remote track
        track: Arc<dyn MediaTrack>,
    },
    /// A local ICE candidate was discovered and should be sent to the remote party
    LocalCandidate(IceCandidate),
}

/// Sink for transport events
///
/// Called from transport-internal tasks; must not block.
pub type TransportEventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// One negotiated peer transport
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Add a local track, returning its sender
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<SenderId>;

    /// Remove a sender added by `add_track`
    async fn remove_track(&self, sender: &SenderId) -> Result<()>;

    /// Create a local offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create a local answer (remote offer must be applied)
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

/// Allocates transport handles
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport configured with `config`, delivering events to `on_event`
    async fn create(
        &self,
        config: &TransportConfig,
        on_event: TransportEventHandler,
    ) -> Result<Arc<dyn PeerTransport>>;
}
