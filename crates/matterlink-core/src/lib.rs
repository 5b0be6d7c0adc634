//! Core types for the Matter server WebSocket protocol.
//!
//! This crate provides the wire primitives and nothing that does I/O: the
//! outbound command envelope, the inbound classifier, the handshake payload,
//! the closed sets of commands and events, and the models carried in results.

mod command;
mod error;
mod event;
mod message;
mod model;

pub use command::Command;
pub use error::{ErrorCode, ProtocolError};
pub use event::EventKind;
pub use message::{CommandMessage, ErrorResult, EventMessage, InboundMessage, SuccessResult};
pub use model::{
    CommissionableNodeData, CommissioningParameters, MatterFabricData, MatterNode,
    MatterSoftwareVersion, NodePingResult, VendorNames,
};

use serde::{Deserialize, Serialize};

/// The schema revision this client speaks.
///
/// Servers advertising a `min_supported_schema_version` above this value
/// cannot talk to us.
pub const CLIENT_SCHEMA_VERSION: u32 = 11;

/// Server capabilities, sent as the first frame after connect.
///
/// Replaced wholesale on `server_info_updated`; never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Schema revision implemented by the server (used for command gating).
    pub schema_version: u32,
    /// Oldest client schema the server still accepts.
    pub min_supported_schema_version: u32,
    #[serde(default)]
    pub fabric_id: u64,
    #[serde(default)]
    pub compressed_fabric_id: u64,
    #[serde(default)]
    pub sdk_version: String,
    #[serde(default)]
    pub wifi_credentials_set: bool,
    #[serde(default)]
    pub thread_credentials_set: bool,
    #[serde(default)]
    pub bluetooth_enabled: bool,
}

impl ServerInfo {
    /// Parse the handshake frame.
    ///
    /// The frame must be a flat object that is neither a result nor an event.
    pub fn from_handshake(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        if object.contains_key("message_id") || object.contains_key("event") {
            return Err(ProtocolError::UnexpectedShape(
                "handshake must not carry message_id or event",
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Whether the server implements at least `required`.
    pub fn supports(&self, required: u32) -> bool {
        self.schema_version >= required
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Unconnected,
    /// Socket opening or waiting for the handshake.
    Connecting,
    /// Handshake done, commands may be issued.
    Open,
    /// Torn down. Terminal for this client instance.
    Closed,
}
