//! Binary wire protocol for the editing service connection.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬────────────┬──────────┬──────────┐
//! │ msg_type │ client_id │ request_id │ file_key │ payload  │
//! │ 1 byte   │ 16 bytes  │ 8 bytes    │ variable │ variable │
//! └──────────┴───────────┴────────────┴──────────┴──────────┘
//! ```
//!
//! Everything here is serialization boilerplate: the protocol carries
//! apply requests and their acks, server-pushed session updates, and
//! heartbeats. The coalescing queue never touches this module directly;
//! it goes through the [`crate::queue::PatchManager`] boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::patch::Patch;

/// Message types for the client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Ordered patch batch to apply to a file
    ApplyPatch = 1,
    /// Server acknowledged an apply request
    ApplyAck = 2,
    /// Server rejected an apply request
    ApplyError = 3,
    /// Server-pushed session field update
    SessionUpdate = 4,
    /// Heartbeat ping
    Ping = 5,
    /// Heartbeat pong
    Pong = 6,
}

/// A session field change pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub field: String,
    pub value: String,
}

/// Top-level protocol message.
///
/// `request_id` correlates a response with its request; notifications
/// carry zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub msg_type: MessageType,
    pub client_id: Uuid,
    pub request_id: u64,
    pub file_key: String,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Create an apply request carrying an ordered patch batch.
    pub fn apply_patch(
        client_id: Uuid,
        request_id: u64,
        file_key: impl Into<String>,
        batch: &[Patch],
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(batch, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::ApplyPatch,
            client_id,
            request_id,
            file_key: file_key.into(),
            payload,
        })
    }

    /// Create an apply acknowledgement.
    pub fn apply_ack(client_id: Uuid, request_id: u64, file_key: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::ApplyAck,
            client_id,
            request_id,
            file_key: file_key.into(),
            payload: Vec::new(),
        }
    }

    /// Create an apply rejection with a reason.
    pub fn apply_error(
        client_id: Uuid,
        request_id: u64,
        file_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: MessageType::ApplyError,
            client_id,
            request_id,
            file_key: file_key.into(),
            payload: reason.into().into_bytes(),
        }
    }

    /// Create a session field update notification.
    pub fn session_update(client_id: Uuid, update: &SessionUpdate) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(update, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::SessionUpdate,
            client_id,
            request_id: 0,
            file_key: String::new(),
            payload,
        })
    }

    /// Create a ping message.
    pub fn ping(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Ping,
            client_id,
            request_id: 0,
            file_key: String::new(),
            payload: Vec::new(),
        }
    }

    /// Create a pong message.
    pub fn pong(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Pong,
            client_id,
            request_id: 0,
            file_key: String::new(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the patch batch of an apply request.
    pub fn patches(&self) -> Result<Vec<Patch>, ProtocolError> {
        if self.msg_type != MessageType::ApplyPatch {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (batch, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(batch)
    }

    /// Rejection reason of an apply error.
    pub fn error_reason(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::ApplyError {
            return Err(ProtocolError::InvalidMessageType);
        }
        String::from_utf8(self.payload.clone())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Parse a session update payload.
    pub fn session_field(&self) -> Result<SessionUpdate, ProtocolError> {
        if self.msg_type != MessageType::SessionUpdate {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (update, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(update)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Request timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
