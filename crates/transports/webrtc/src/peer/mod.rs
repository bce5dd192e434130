//! WebRTC peer connections behind the call transport traits

pub mod connection;
pub mod factory;

pub use connection::{map_connection_state, WebRtcPeerTransport};
pub use factory::{rtc_configuration, WebRtcTransportFactory};
