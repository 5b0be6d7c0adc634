//! Protocol messages.
//!
//! The wire format has no discriminant field: a frame is a result, an error
//! or an event depending on which keys it carries. [`InboundMessage::parse`]
//! settles that once, so the rest of the client matches on an enum.

use crate::{Command, EventKind, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(with = "message_id")]
    pub message_id: u64,
    pub command: Command,
    #[serde(default = "empty_args")]
    pub args: Value,
}

impl CommandMessage {
    pub fn new(message_id: u64, command: Command, args: Value) -> Self {
        Self {
            message_id,
            command,
            args,
        }
    }
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A command completed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResult {
    #[serde(with = "message_id")]
    pub message_id: u64,
    pub result: Value,
}

/// A command failed on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    #[serde(with = "message_id")]
    pub message_id: u64,
    pub error_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// An unsolicited push from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventMessage {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            event: kind.as_str().to_string(),
            data,
        }
    }

    /// The event's kind, or `None` if the name is not one we know.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_wire(&self.event)
    }
}

/// Any frame the server may send after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Success(SuccessResult),
    Error(ErrorResult),
    Event(EventMessage),
}

impl InboundMessage {
    /// Decode and classify one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        if object.contains_key("event") {
            return Ok(Self::Event(serde_json::from_value(value)?));
        }
        if !object.contains_key("message_id") {
            return Err(ProtocolError::UnexpectedShape(
                "neither an event nor addressed to a message_id",
            ));
        }
        if object.contains_key("error_code") {
            return Ok(Self::Error(serde_json::from_value(value)?));
        }
        if object.contains_key("result") {
            return Ok(Self::Success(serde_json::from_value(value)?));
        }
        Err(ProtocolError::UnexpectedShape(
            "message_id without result or error_code",
        ))
    }

    /// Request id this frame answers, if it is a response.
    pub fn message_id(&self) -> Option<u64> {
        match self {
            Self::Success(msg) => Some(msg.message_id),
            Self::Error(msg) => Some(msg.message_id),
            Self::Event(_) => None,
        }
    }
}

/// `message_id` travels as a decimal string.
mod message_id {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(id),
            Raw::Text(text) => text
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid message_id {text:?}"))),
        }
    }
}
