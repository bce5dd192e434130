//! Peer session and transport handle abstraction
//!
//! Handles the offer/answer exchange, candidate buffering and transport
//! lifecycle for a single remote party.

pub mod session;
pub mod transport;

pub use session::{
    CallRole, CandidateDisposition, LocalCandidateCallback, PeerSession, RemoteTrackCallback,
    StateChangeCallback,
};
pub use transport::{
    ConnectionState, PeerTransport, SenderId, TransportEvent, TransportEventHandler,
    TransportFactory,
};
