use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix prepended to chat text relayed to everyone but the sender.
pub const RELAY_PREFIX: &str = "Message from another client: ";

/// Events the hub pushes to clients.
///
/// Every frame is a JSON envelope `{"event": "<name>", "data": {...}}` so
/// browser clients can dispatch on the event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ServerMessage(ServerMessage),
    ServerUpdate(ServerUpdate),
    Error(ErrorNotice),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerUpdate {
    pub value: u8,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}

/// Events clients send to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    ClientMessage(ChatMessage),
}

/// A chat line as sent by a client. The wire field is `message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(rename = "message")]
    pub text: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid client event: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("binary frames are not supported")]
    Binary,
}

impl ServerEvent {
    /// Plain announcement without timestamp or echo flag.
    pub fn announcement(message: impl Into<String>) -> Self {
        Self::ServerMessage(ServerMessage {
            message: message.into(),
            timestamp: None,
            echo: None,
        })
    }

    pub fn welcome(ordinal: usize) -> Self {
        Self::announcement(format!("Welcome! You are client #{ordinal}"))
    }

    pub fn joined(total: usize) -> Self {
        Self::announcement(format!(
            "A new client has connected. Total clients: {total}"
        ))
    }

    pub fn left(total: usize) -> Self {
        Self::announcement(format!(
            "A client has disconnected. Total clients: {total}"
        ))
    }

    /// The sender's own text, returned verbatim.
    pub fn echo(text: &str, timestamp: f64) -> Self {
        Self::ServerMessage(ServerMessage {
            message: text.to_string(),
            timestamp: Some(timestamp),
            echo: Some(true),
        })
    }

    pub fn relay(text: &str, timestamp: f64) -> Self {
        Self::ServerMessage(ServerMessage {
            message: format!("{RELAY_PREFIX}{text}"),
            timestamp: Some(timestamp),
            echo: Some(false),
        })
    }

    pub fn update(value: u8, timestamp: f64) -> Self {
        Self::ServerUpdate(ServerUpdate { value, timestamp })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ClientEvent {
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
