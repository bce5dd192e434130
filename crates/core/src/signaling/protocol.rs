//! Call signaling payloads
//!
//! Descriptions and candidates use the browser JSON shapes
//! (`{type, sdp}` and `{candidate, sdpMid, sdpMLineIndex, usernameFragment}`)
//! so they pass through a relay shared with browser clients unchanged.

use super::SignalEvent;
use crate::{Error, Result, UserId};
use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the caller
    Offer,
    /// Answer from the callee
    Answer,
}

/// Negotiated media/transport capability description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate from its attribute line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Payload of `call:offer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    /// Caller identity (filled in by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,

    /// Caller's offer
    pub offer: SessionDescription,
}

/// Payload of `call:answer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    /// Callee identity (filled in by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,

    /// Callee's answer
    pub answer: SessionDescription,
}

/// Payload of `call:ice`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcePayload {
    /// Sender identity (filled in by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,

    /// Discovered candidate
    pub candidate: IceCandidate,
}

/// Payload of `call:hangup` and `call:busy`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPayload {
    /// Sender identity (filled in by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
}

/// A decoded inbound call signal
#[derive(Debug, Clone, PartialEq)]
pub enum CallSignal {
    /// Remote party is calling us
    Offer(OfferPayload),
    /// Remote party accepted our offer
    Answer(AnswerPayload),
    /// Remote network candidate
    Ice(IcePayload),
    /// Remote party hung up
    Hangup(PeerPayload),
    /// Remote party is already in another call
    Busy(PeerPayload),
}

impl CallSignal {
    /// Decode a signal from its event name and JSON payload
    pub fn decode(event: SignalEvent, payload: serde_json::Value) -> Result<Self> {
        let signal = match event {
            SignalEvent::Offer => CallSignal::Offer(from_payload(event, payload)?),
            SignalEvent::Answer => CallSignal::Answer(from_payload(event, payload)?),
            SignalEvent::Ice => CallSignal::Ice(from_payload(event, payload)?),
            SignalEvent::Hangup => CallSignal::Hangup(peer_payload(event, payload)?),
            SignalEvent::Busy => CallSignal::Busy(peer_payload(event, payload)?),
        };
        Ok(signal)
    }

    /// Event name this signal travels under
    pub fn event(&self) -> SignalEvent {
        match self {
            CallSignal::Offer(_) => SignalEvent::Offer,
            CallSignal::Answer(_) => SignalEvent::Answer,
            CallSignal::Ice(_) => SignalEvent::Ice,
            CallSignal::Hangup(_) => SignalEvent::Hangup,
            CallSignal::Busy(_) => SignalEvent::Busy,
        }
    }

    /// Sender identity, when the relay provided one
    pub fn from_user_id(&self) -> Option<&str> {
        match self {
            CallSignal::Offer(p) => p.from_user_id.as_deref(),
            CallSignal::Answer(p) => p.from_user_id.as_deref(),
            CallSignal::Ice(p) => p.from_user_id.as_deref(),
            CallSignal::Hangup(p) | CallSignal::Busy(p) => p.from_user_id.as_deref(),
        }
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(
    event: SignalEvent,
    payload: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| {
        Error::SerializationError(format!("Invalid {} payload: {}", event.as_str(), e))
    })
}

// Hangup and busy carry no required fields; relays may deliver them with no body.
fn peer_payload(event: SignalEvent, payload: serde_json::Value) -> Result<PeerPayload> {
    if payload.is_null() {
        return Ok(PeerPayload::default());
    }
    from_payload(event, payload)
}
