//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the subset used by the call relay is supported: the default
//! namespace, text frames and plain events. Packets for other namespaces
//! decode as [`Packet::Namespaced`] and are left to the caller to ignore.
//!
//! Engine.IO packet types are the first character; a Socket.IO packet rides
//! inside an Engine.IO `message` (type `4`), so `42[...]` is a Socket.IO
//! EVENT.

use peercall_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine.IO open handshake sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id
    pub sid: String,

    /// Transports the server would upgrade to
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Server ping interval in milliseconds
    pub ping_interval: u64,

    /// Time the server waits for a pong in milliseconds
    pub ping_timeout: u64,

    /// Maximum payload size in bytes
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// A decoded text packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO `0{...}`
    Open(Handshake),
    /// Engine.IO `1`
    Close,
    /// Engine.IO `2`
    Ping,
    /// Engine.IO `3`
    Pong,
    /// Engine.IO `6`
    Noop,
    /// Socket.IO CONNECT `40{...}` (auth on the way out, `{sid}` on the way in)
    Connect(Option<Value>),
    /// Socket.IO DISCONNECT `41`
    Disconnect,
    /// Socket.IO EVENT `42[name, payload]`
    Event { name: String, payload: Value },
    /// Socket.IO ACK `43<id>[...]`
    Ack { id: u64, args: Vec<Value> },
    /// Socket.IO CONNECT_ERROR `44{...}`
    ConnectError(Value),
    /// Any Socket.IO packet addressed to a namespace other than `/`
    Namespaced { namespace: String, raw: String },
}

impl Packet {
    /// Build an event packet
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Packet::Event {
            name: name.into(),
            payload,
        }
    }

    /// Encode as a WebSocket text frame
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => {
                let body = serde_json::to_value(handshake).unwrap_or(Value::Null);
                format!("0{}", body)
            }
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(data)) => format!("40{}", data),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, payload } => {
                let args = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                format!("42{}", args)
            }
            Packet::Ack { id, args } => format!("43{}{}", id, Value::Array(args.clone())),
            Packet::ConnectError(data) => format!("44{}", data),
            Packet::Namespaced { raw, .. } => format!("4{}", raw),
        }
    }

    /// Decode a WebSocket text frame
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| Error::SignalingError("Empty packet".to_string()))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => {
                let handshake: Handshake = serde_json::from_str(rest).map_err(|e| {
                    Error::SignalingError(format!("Invalid open packet: {}", e))
                })?;
                Ok(Packet::Open(handshake))
            }
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket_packet(rest),
            '6' => Ok(Packet::Noop),
            other => Err(Error::SignalingError(format!(
                "Unsupported Engine.IO packet type '{}'",
                other
            ))),
        }
    }
}

fn decode_socket_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| Error::SignalingError("Empty Socket.IO packet".to_string()))?;
    let body = match split_namespace(chars.as_str()) {
        (None, body) => body,
        (Some(namespace), _) => {
            return Ok(Packet::Namespaced {
                namespace: namespace.to_string(),
                raw: text.to_string(),
            })
        }
    };

    match socket_type {
        '0' => {
            if body.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(parse_json(body)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            // Acknowledgement ids are not used by the relay; skip them
            let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
            let args = match parse_json(body)? {
                Value::Array(args) => args,
                other => {
                    return Err(Error::SignalingError(format!(
                        "Event payload is not an array: {}",
                        other
                    )))
                }
            };
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(Error::SignalingError(
                        "Event packet without a name".to_string(),
                    ))
                }
            };
            Ok(Packet::Event {
                name,
                payload: args.next().unwrap_or(Value::Null),
            })
        }
        '3' => {
            let split = body
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(body.len());
            let id = body[..split]
                .parse()
                .map_err(|_| Error::SignalingError("Ack packet without an id".to_string()))?;
            let args = match parse_json(&body[split..])? {
                Value::Array(args) => args,
                other => vec![other],
            };
            Ok(Packet::Ack { id, args })
        }
        '4' => Ok(Packet::ConnectError(if body.is_empty() {
            Value::Null
        } else {
            parse_json(body)?
        })),
        other => Err(Error::SignalingError(format!(
            "Unsupported Socket.IO packet type '{}'",
            other
        ))),
    }
}

/// Split a leading `/namespace,` prefix off the body
///
/// The default namespace (`/` or no prefix) yields `None`.
fn split_namespace(body: &str) -> (Option<&str>, &str) {
    if !body.starts_with('/') {
        return (None, body);
    }

    let (namespace, rest) = match body.find(',') {
        Some(comma) => (&body[..comma], &body[comma + 1..]),
        None => (body, ""),
    };
    if namespace == "/" {
        (None, rest)
    } else {
        (Some(namespace), rest)
    }
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| Error::SignalingError(format!("Invalid packet JSON: {}", e)))
}
