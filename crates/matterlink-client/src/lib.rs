//! WebSocket client for a Matter server.
//!
//! Connects, checks the server's handshake, and then multiplexes command
//! requests and push events over the one socket:
//! - Requests carry a fresh `message_id` and may be answered in any order
//! - Commands newer than the server's schema are refused locally
//! - Node events keep a local node cache current before listeners run
//!
//! ```no_run
//! use matterlink_client::{ClientConfig, EventKind, MatterClient};
//!
//! # async fn demo() -> Result<(), matterlink_client::ClientError> {
//! let client = MatterClient::new(ClientConfig::new("ws://localhost:5580/ws"));
//! client.connect().await?;
//! let _sub = client.add_event_listener(EventKind::NodeAdded, |data| {
//!     println!("node added: {data}");
//! });
//! let nodes = client.start_listening().await?;
//! println!("{} nodes", nodes.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod correlator;
mod error;
mod events;
mod handshake;
mod nodes;
mod transport;

pub use client::{CommissioningWindow, MatterClient, NetworkCommissioning};
pub use config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ClientError, ConnectionError};
pub use events::{EventDispatcher, Subscription};

pub use matterlink_core::{
    CLIENT_SCHEMA_VERSION, Command, CommissionableNodeData, CommissioningParameters,
    ConnectionState, ErrorCode, EventKind, MatterFabricData, MatterNode, MatterSoftwareVersion,
    NodePingResult, ProtocolError, ServerInfo, VendorNames,
};
