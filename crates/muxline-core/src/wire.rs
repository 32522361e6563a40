//! Wire message catalogue.
//!
//! Control events travel under their bare names. Channel events travel as
//! `key_<number>` so that every channel of a session owns a disjoint slice of
//! the link's event namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WireError;
use crate::ids::{ChannelNumber, SessionIdentity};

/// Auth token (client → server) and auth result (server → client).
pub const AUTHENTICATION: &str = "authentication";
/// Channel-open message. Also the reserved logical "open" key on a channel.
pub const CONNECTION: &str = "connection";
/// Transport lifecycle: link lost. Also the logical teardown key on a channel.
pub const DISCONNECT: &str = "disconnect";
/// Transport lifecycle: link re-established.
pub const RECONNECT: &str = "reconnect";
/// Transport lifecycle: first connection established.
pub const CONNECT: &str = "connect";
/// Transport lifecycle: first connection attempt failed.
pub const CONNECT_ERROR: &str = "connect_error";
/// Transport lifecycle: first connection attempt timed out.
pub const CONNECT_TIMEOUT: &str = "connect_timeout";
/// Transport lifecycle: a reconnection attempt failed.
pub const RECONNECT_ERROR: &str = "reconnect_error";
/// Transport lifecycle: reconnection attempts exhausted.
pub const RECONNECT_FAILED: &str = "reconnect_failed";
/// Reconnecting client presents its [`SessionIdentity`].
pub const CHALLENGE_RECONNECT: &str = "challenge_reconnect";
/// Server does not know the presented identity.
pub const CHALLENGE_FAILED: &str = "challenge_failed";
/// Server refused a channel-open.
pub const CONNECTION_REJECTED: &str = "connection_rejected";

/// Reply value that marks a successful authentication.
pub const AUTH_SUCCESS: &str = "success";

/// Transport lifecycle event names a link may dispatch locally.
pub const TRANSPORT_EVENTS: [&str; 7] = [
    CONNECT,
    DISCONNECT,
    RECONNECT,
    CONNECT_ERROR,
    CONNECT_TIMEOUT,
    RECONNECT_ERROR,
    RECONNECT_FAILED,
];

/// Encode a logical channel event key as its wire event name.
pub fn wire_name(key: &str, number: ChannelNumber) -> String {
    format!("{key}_{number}")
}

/// Whether `key` is reserved and never travels as a channel event.
pub fn is_reserved_key(key: &str) -> bool {
    key == CONNECTION
}

/// Channel-open message `{name, number, id}`.
///
/// Travels JSON-encoded inside a string value, so the server can parse it
/// with the same code regardless of transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpen {
    /// Channel name, keys the server's factory table.
    pub name: String,
    /// Initiator-assigned number, unique within the session.
    pub number: ChannelNumber,
    /// Initiator's session identity.
    pub id: SessionIdentity,
}

impl ChannelOpen {
    /// Encode as the string value sent under [`CONNECTION`].
    pub fn to_wire(&self) -> Result<Value, WireError> {
        Ok(Value::String(serde_json::to_string(self)?))
    }

    /// Parse from the value received under [`CONNECTION`].
    ///
    /// Accepts either the JSON-in-string form or a bare JSON object.
    pub fn from_wire(value: &Value) -> Result<Self, WireError> {
        match value {
            Value::String(s) => Ok(serde_json::from_str(s)?),
            Value::Object(_) => Ok(Self::deserialize(value)?),
            _ => Err(WireError::UnexpectedValue {
                event: CONNECTION.into(),
                expected: "a JSON string or object",
            }),
        }
    }
}

/// Why a channel-open was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The number is already in use within the session.
    DuplicateNumber,
    /// The session already holds the maximum number of channels.
    ChannelLimit,
}

impl RejectReason {
    /// Wire spelling of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateNumber => "duplicate_number",
            Self::ChannelLimit => "channel_limit",
        }
    }
}

/// Body of a [`CONNECTION_REJECTED`] event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRejected {
    /// Channel name from the refused open.
    pub name: String,
    /// Channel number from the refused open.
    pub number: ChannelNumber,
    /// Reason for refusal.
    pub reason: RejectReason,
}

/// Extract a session identity from a [`CHALLENGE_RECONNECT`] value.
pub fn identity_from_wire(value: &Value) -> Result<SessionIdentity, WireError> {
    value
        .as_str()
        .map(SessionIdentity::from)
        .ok_or(WireError::UnexpectedValue {
            event: CHALLENGE_RECONNECT.into(),
            expected: "a session identity string",
        })
}

/// One message on a framed transport: `{"event": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Wire event name.
    pub event: String,
    /// Event value; absent data decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl WireFrame {
    /// Build a frame.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}
