//! Client-facing message formats
//!
//! Server -> client: `id_<hex>` on connect, then `{"op":"TXT","txt":...}` results.
//! Client -> server: `{"op":"get","txt":...}` requests and a literal keep-alive.

use crate::id::ConnectionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Operation name of a generate request (matched case-insensitively)
pub const GENERATE_OP: &str = "get";

/// Operation tag of a generated result
pub const TEXT_OP: &str = "TXT";

/// Prefix of the out-of-band identifier message
const ASSIGNED_ID_PREFIX: &str = "id_";

/// Reasons a client message is discarded
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing or non-string field `{0}`")]
    MissingField(&'static str),
}

/// A message received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Keep-alive acknowledgement; ignored
    KeepAlive,

    /// Request to continue `text`
    Generate { text: String },

    /// Well-formed message with an operation this server does not handle
    Other { op: String },
}

impl ClientMessage {
    /// Parse one text frame.
    ///
    /// `keep_alive` is the reserved literal compared before any JSON parsing.
    pub fn parse(raw: &str, keep_alive: &str) -> Result<Self, ProtocolError> {
        if raw == keep_alive {
            return Ok(ClientMessage::KeepAlive);
        }

        let value: Value = serde_json::from_str(raw)?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        let op = object
            .get("op")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("op"))?;

        if !op.eq_ignore_ascii_case(GENERATE_OP) {
            return Ok(ClientMessage::Other { op: op.to_string() });
        }

        let text = object
            .get("txt")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("txt"))?;

        Ok(ClientMessage::Generate {
            text: text.to_string(),
        })
    }
}

/// A structured message sent to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub op: String,
    pub txt: String,
}

impl ServerMessage {
    /// A generated continuation
    pub fn text(txt: impl Into<String>) -> Self {
        Self {
            op: TEXT_OP.to_string(),
            txt: txt.into(),
        }
    }

    /// Compact JSON encoding, no whitespace between tokens
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The message announcing a connection's identifier
pub fn assigned_id_message(id: &ConnectionId) -> String {
    format!("{}{}", ASSIGNED_ID_PREFIX, id)
}
