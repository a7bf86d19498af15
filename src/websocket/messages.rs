//! WebSocket Message Types
//!
//! Defines the JSON text frames exchanged between dashboard clients and the
//! broadcast hub. Both directions are shared by the server and the client
//! library in this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to channels for pushed updates
    Subscribe { channels: Vec<String> },
    /// Unsubscribe from channels
    Unsubscribe { channels: Vec<String> },
    /// Application-level keepalive
    Ping,
}

impl ClientMessage {
    /// Parse an inbound text frame.
    ///
    /// Parsing is done in two steps so that malformed JSON, an unknown
    /// `type` and a bad channel list each map to their own error code.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        // Parsed, but not an object: there is no `type` to read
        let Some(object) = value.as_object() else {
            return Err(ProtocolError::UnknownType("<missing>".to_string()));
        };

        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
            None => return Err(ProtocolError::UnknownType("<missing>".to_string())),
        };

        match kind {
            "subscribe" => Ok(ClientMessage::Subscribe {
                channels: channel_list(object.get("channels"))?,
            }),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                channels: channel_list(object.get("channels"))?,
            }),
            "ping" => Ok(ClientMessage::Ping),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn channel_list(value: Option<&Value>) -> Result<Vec<String>, ProtocolError> {
    let items = value
        .and_then(Value::as_array)
        .ok_or(ProtocolError::InvalidChannels)?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or(ProtocolError::InvalidChannels)
        })
        .collect()
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
        /// All channels available on this server
        channels: Vec<String>,
    },
    /// Subscription confirmed
    Subscribed {
        channels: Vec<String>,
        /// Requested channels that are not registered
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        invalid: Vec<String>,
    },
    /// Unsubscription confirmed
    Unsubscribed { channels: Vec<String> },
    /// Channel data push
    Data {
        channel: String,
        data: Value,
        /// Unix milliseconds
        timestamp: i64,
    },
    /// Protocol error; the connection stays open
    Error { message: String, code: ErrorCode },
    /// Reply to `ping`
    Pong { timestamp: i64 },
}

impl ServerMessage {
    pub fn data(channel: &str, data: Value) -> Self {
        ServerMessage::Data {
            channel: channel.to_string(),
            data,
            timestamp: now_ms(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong { timestamp: now_ms() }
    }
}

/// Stable error codes carried by `error` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidJson,
    InvalidChannels,
    UnknownType,
    TooManyConnections,
}

/// Inbound frame could not be turned into a [`ClientMessage`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("channels must be an array of channel names")]
    InvalidChannels,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::InvalidJson(_) => ErrorCode::InvalidJson,
            ProtocolError::InvalidChannels => ErrorCode::InvalidChannels,
            ProtocolError::UnknownType(_) => ErrorCode::UnknownType,
        }
    }
}

impl From<&ProtocolError> for ServerMessage {
    fn from(err: &ProtocolError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
            code: err.code(),
        }
    }
}

/// Current time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
