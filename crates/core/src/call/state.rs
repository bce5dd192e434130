//! Call states and end reasons

use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable call controller state
///
/// `Idle` is both the initial state and the target of every teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// No call
    #[default]
    Idle,
    /// Outbound call placed, waiting for the callee
    Requesting,
    /// Inbound call being answered
    Ringing,
    /// Transport reported connected
    Connected,
}

impl CallState {
    /// Check if a call is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, CallState::Idle)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Requesting => "requesting",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `hangup()` was called locally
    LocalHangup,
    /// The remote party hung up
    RemoteHangup,
    /// The callee declined because it is already in a call
    RemoteBusy,
    /// Local capture could not be acquired
    MediaUnavailable(String),
    /// Offer/answer exchange failed
    NegotiationFailed(String),
    /// Transport reported failure
    TransportFailed,
    /// Transport closed underneath the call
    TransportClosed,
    /// Nobody answered within the ring timeout
    Timeout,
    /// The controller was stopped
    Stopped,
}

impl EndReason {
    /// Whether the call ended because something went wrong
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EndReason::MediaUnavailable(_)
                | EndReason::NegotiationFailed(_)
                | EndReason::TransportFailed
                | EndReason::TransportClosed
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LocalHangup => f.write_str("local hangup"),
            EndReason::RemoteHangup => f.write_str("remote hangup"),
            EndReason::RemoteBusy => f.write_str("remote busy"),
            EndReason::MediaUnavailable(msg) => write!(f, "media unavailable: {}", msg),
            EndReason::NegotiationFailed(msg) => write!(f, "negotiation failed: {}", msg),
            EndReason::TransportFailed => f.write_str("transport failed"),
            EndReason::TransportClosed => f.write_str("transport closed"),
            EndReason::Timeout => f.write_str("ring timeout"),
            EndReason::Stopped => f.write_str("controller stopped"),
        }
    }
}
