//! Handshake negotiation.
//!
//! The server opens every session with a [`ServerInfo`] frame. Nothing else
//! is dispatched until it has been accepted here.

use crate::error::ConnectionError;
use matterlink_core::{CLIENT_SCHEMA_VERSION, ServerInfo};

/// Accept or reject the server's opening frame.
pub(crate) fn negotiate(
    frame: &str,
    min_server_schema: u32,
) -> Result<ServerInfo, ConnectionError> {
    let info = ServerInfo::from_handshake(frame)?;

    if info.schema_version < min_server_schema {
        return Err(ConnectionError::IncompatibleServer(format!(
            "server schema {} is older than the required {}, update the Matter server",
            info.schema_version, min_server_schema
        )));
    }
    if info.min_supported_schema_version > CLIENT_SCHEMA_VERSION {
        return Err(ConnectionError::IncompatibleServer(format!(
            "server requires client schema {} or newer, this client speaks {}",
            info.min_supported_schema_version, CLIENT_SCHEMA_VERSION
        )));
    }
    if info.schema_version > CLIENT_SCHEMA_VERSION {
        tracing::warn!(
            "Matter server has schema version {} which is newer than the {} of this client",
            info.schema_version,
            CLIENT_SCHEMA_VERSION
        );
    }

    tracing::info!(
        "Connected to Matter fabric {} ({}), schema version {}, SDK version {}",
        info.fabric_id,
        info.compressed_fabric_id,
        info.schema_version,
        info.sdk_version
    );
    Ok(info)
}
