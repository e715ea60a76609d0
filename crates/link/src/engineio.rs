//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only what the polling transport needs: text packets, the default
//! namespace and acknowledgements. Binary attachments are rejected.

use serde::Deserialize;
use serde_json::Value;

/// Separates packets inside one polling payload.
pub const SEPARATOR: char = '\u{1e}';

/// Socket.IO connect to the default namespace.
pub const CONNECT: &str = "40";

/// Socket.IO disconnect from the default namespace, then Engine.IO close.
pub const CLOSE: &str = "41\u{1e}1";

/// Engine.IO pong.
pub const PONG: &str = "3";

/// Errors decoding Engine.IO / Socket.IO traffic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Zero-length packet
    #[error("empty packet")]
    Empty,

    /// Packet type byte not defined by the protocol
    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    /// Packet could not be parsed
    #[error("malformed packet {packet:?}: {reason}")]
    Malformed {
        /// Raw packet text
        packet: String,
        /// What was wrong with it
        reason: String,
    },

    /// Valid packet in the wrong place
    #[error("expected {expected}, got {got}")]
    Unexpected {
        /// What the client was waiting for
        expected: &'static str,
        /// What arrived instead
        got: String,
    },
}

fn malformed(packet: &str, reason: impl ToString) -> ProtocolError {
    ProtocolError::Malformed {
        packet: packet.to_string(),
        reason: reason.to_string(),
    }
}

/// Engine.IO open packet payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Session id, echoed on every request
    pub sid: String,
    /// Transports the server can upgrade to
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    /// Largest accepted payload in bytes
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Session opened
    Open(Handshake),
    /// Session closed by the server
    Close,
    /// Server heartbeat
    Ping,
    /// Heartbeat reply
    Pong,
    /// Socket.IO packet carried inside
    Message(SocketPacket),
    /// Transport upgrade
    Upgrade,
    /// Empty filler
    Noop,
}

/// Socket.IO packet (default namespace).
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connected
    Connect(Value),
    /// Namespace disconnected
    Disconnect,
    /// Event, possibly asking for an acknowledgement
    Event {
        /// Ack id requested by the sender
        ack_id: Option<u64>,
        /// `[name, ...args]`
        data: Value,
    },
    /// Acknowledgement of an earlier event
    Ack {
        /// Id of the acknowledged event
        ack_id: u64,
        /// Reply arguments
        data: Value,
    },
    /// Namespace connection refused
    ConnectError(Value),
}

/// Raw packets of a polling payload, empty ones skipped.
pub fn split_payload(body: &str) -> impl Iterator<Item = &str> {
    body.split(SEPARATOR).filter(|p| !p.is_empty())
}

/// Split a polling payload into packets.
pub fn decode_payload(body: &str) -> Result<Vec<Packet>, ProtocolError> {
    split_payload(body).map(decode_packet).collect()
}

/// Decode one Engine.IO packet.
pub fn decode_packet(raw: &str) -> Result<Packet, ProtocolError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(Packet::Open)
            .map_err(|e| malformed(raw, e)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest)
            .map(Packet::Message)
            .map_err(|e| match e {
                ProtocolError::Empty => malformed(raw, "empty message"),
                other => other,
            }),
        '5' => Ok(Packet::Upgrade),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

fn decode_socket_packet(raw: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let mut rest = chars.as_str();

    if matches!(kind, '5' | '6') {
        return Err(malformed(raw, "binary packets are not supported"));
    }

    // Non-default namespace prefix: "/name,"
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(i) => &rest[i + 1..],
            None => "",
        };
    }

    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let ack_id = if digits > 0 {
        Some(rest[..digits].parse::<u64>().map_err(|e| malformed(raw, e))?)
    } else {
        None
    };

    let body = &rest[digits..];
    let data = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).map_err(|e| malformed(raw, e))?
    };

    match kind {
        '0' => Ok(SocketPacket::Connect(data)),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => Ok(SocketPacket::Event { ack_id, data }),
        '3' => {
            let ack_id = ack_id.ok_or_else(|| malformed(raw, "ack without id"))?;
            Ok(SocketPacket::Ack { ack_id, data })
        }
        '4' => Ok(SocketPacket::ConnectError(data)),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

/// Encode an event that asks for an acknowledgement.
pub fn encode_event(ack_id: u64, event: &str, args: &[Value]) -> String {
    let mut array = Vec::with_capacity(args.len() + 1);
    array.push(Value::String(event.to_string()));
    array.extend_from_slice(args);
    format!("42{}{}", ack_id, Value::Array(array))
}

/// First argument of an ack, or `Null` if there is none.
pub fn first_arg(data: Value) -> Value {
    match data {
        Value::Array(args) => args.into_iter().next().unwrap_or(Value::Null),
        other => other,
    }
}
