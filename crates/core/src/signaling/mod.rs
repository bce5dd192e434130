//! Signaling channel abstraction
//!
//! The relay is an injected capability: the controller sends named events
//! addressed to a user and registers handlers for inbound events. Routing by
//! `toUserId`/`fromUserId` is the channel's job.

pub mod protocol;

pub use protocol::{
    AnswerPayload, CallSignal, IceCandidate, IcePayload, OfferPayload, PeerPayload, SdpType,
    SessionDescription,
};

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Call signaling events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalEvent {
    /// `call:offer` (caller → callee)
    Offer,
    /// `call:answer` (callee → caller)
    Answer,
    /// `call:ice` (either direction)
    Ice,
    /// `call:hangup` (either direction)
    Hangup,
    /// `call:busy` (callee → caller, auto-decline)
    Busy,
}

impl SignalEvent {
    /// Every call event, in subscription order
    pub const ALL: [SignalEvent; 5] = [
        SignalEvent::Offer,
        SignalEvent::Answer,
        SignalEvent::Ice,
        SignalEvent::Hangup,
        SignalEvent::Busy,
    ];

    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalEvent::Offer => "call:offer",
            SignalEvent::Answer => "call:answer",
            SignalEvent::Ice => "call:ice",
            SignalEvent::Hangup => "call:hangup",
            SignalEvent::Busy => "call:busy",
        }
    }

    /// Look up an event by wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound event as delivered by the relay
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSignal {
    /// Event name
    pub event: SignalEvent,
    /// Raw JSON payload
    pub payload: serde_json::Value,
}

/// Handle returned by [`SignalingChannel::on_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback for inbound events
///
/// Invoked from the channel's receive task; handlers must not block.
pub type SignalHandler = Arc<dyn Fn(InboundSignal) + Send + Sync>;

/// Bidirectional message relay addressed by user identity
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Whether the channel is currently connected to the relay
    fn is_connected(&self) -> bool;

    /// Send `event` with `payload` to `to_user_id`
    ///
    /// The channel adds `toUserId` to the payload object. Fails with
    /// `Error::SignalingUnavailable` when disconnected; nothing is queued.
    async fn send(
        &self,
        to_user_id: &str,
        event: SignalEvent,
        payload: serde_json::Value,
    ) -> Result<()>;

    /// Register a handler for an inbound event
    fn on_event(&self, event: SignalEvent, handler: SignalHandler) -> SubscriptionId;

    /// Remove a previously registered handler (unknown ids are ignored)
    fn off(&self, subscription: SubscriptionId);
}

/// Insert `toUserId` into an outbound payload
///
/// Non-object payloads (e.g. `null` for hangup) become `{toUserId}`.
pub fn address_payload(to_user_id: &str, payload: serde_json::Value) -> serde_json::Value {
    let mut object = match payload {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    object.insert(
        "toUserId".to_string(),
        serde_json::Value::String(to_user_id.to_string()),
    );
    serde_json::Value::Object(object)
}
