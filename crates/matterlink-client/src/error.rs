//! Client errors.

use matterlink_core::{Command, ErrorCode, ProtocolError};
use std::time::Duration;
use tokio_tungstenite::tungstenite;

/// Failure to establish (or reuse) a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("already connected or connecting")]
    AlreadyConnected,
    #[error("client is closed, create a new one to reconnect")]
    Closed,
    #[error("failed to open {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("timed out connecting to {0}")]
    OpenTimeout(String),
    #[error("connection closed before the handshake")]
    ClosedBeforeHandshake,
    #[error("invalid handshake: {0}")]
    InvalidHandshake(#[from] ProtocolError),
    #[error("incompatible server: {0}")]
    IncompatibleServer(String),
}

/// Everything a command or connect call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("not connected")]
    NotConnected,
    #[error(
        "{command} needs server schema {required} but the server has {actual}, update the Matter server"
    )]
    UnsupportedVersion {
        command: Command,
        required: u32,
        actual: u32,
    },
    #[error(
        "server rejected the command ({}): {}",
        ErrorCode::from(.code.to_owned()),
        .details.as_deref().unwrap_or("no details")
    )]
    Remote { code: i64, details: Option<String> },
    #[error("{command} got no response within {after:?}")]
    Timeout { command: Command, after: Duration },
    #[error("connection lost before a response arrived")]
    ConnectionLost,
    #[error("unexpected result for {command}: {source}")]
    Decode {
        command: Command,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {command}: {source}")]
    Encode {
        command: Command,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// The server's error code, for [`ClientError::Remote`].
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => Some(ErrorCode::from(*code)),
            _ => None,
        }
    }
}
