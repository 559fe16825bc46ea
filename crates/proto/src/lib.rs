//! Quill wire and channel types
//!
//! Client-facing WebSocket message formats plus the request/response pair that
//! crosses from the connection multiplexer to the generation worker and back.

pub mod id;
pub mod message;

pub use id::ConnectionId;
pub use message::{assigned_id_message, ClientMessage, ProtocolError, ServerMessage, GENERATE_OP, TEXT_OP};

use std::time::Instant;

/// A generate request on its way to the worker
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Connection the result must be routed back to
    pub connection_id: ConnectionId,

    /// Raw text supplied by the client
    pub text: String,

    /// When the multiplexer queued the request
    pub enqueued_at: Instant,
}

impl GenerationRequest {
    pub fn new(connection_id: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            connection_id,
            text: text.into(),
            enqueued_at: Instant::now(),
        }
    }
}

/// A serialized result on its way back to the multiplexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResponse {
    /// Connection that submitted the request
    pub connection_id: ConnectionId,

    /// Ready-to-send server message
    pub payload: String,
}
