//! Push event names.

use std::fmt;

/// Events a listener can subscribe to.
///
/// All but [`EventKind::ConnectionLost`] arrive from the server;
/// `ConnectionLost` is raised locally when the transport drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    NodeAdded,
    NodeUpdated,
    NodeRemoved,
    NodeEvent,
    AttributeUpdated,
    ServerShutdown,
    ServerInfoUpdated,
    EndpointAdded,
    EndpointRemoved,
    ConnectionLost,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::NodeAdded,
        Self::NodeUpdated,
        Self::NodeRemoved,
        Self::NodeEvent,
        Self::AttributeUpdated,
        Self::ServerShutdown,
        Self::ServerInfoUpdated,
        Self::EndpointAdded,
        Self::EndpointRemoved,
        Self::ConnectionLost,
    ];

    /// Map a server event name onto the closed set.
    ///
    /// Returns `None` for names this client does not know, and for
    /// `connection_lost`, which the server never sends.
    pub fn from_wire(name: &str) -> Option<Self> {
        Some(match name {
            "node_added" => Self::NodeAdded,
            "node_updated" => Self::NodeUpdated,
            "node_removed" => Self::NodeRemoved,
            "node_event" => Self::NodeEvent,
            "attribute_updated" => Self::AttributeUpdated,
            "server_shutdown" => Self::ServerShutdown,
            "server_info_updated" => Self::ServerInfoUpdated,
            "endpoint_added" => Self::EndpointAdded,
            "endpoint_removed" => Self::EndpointRemoved,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeAdded => "node_added",
            Self::NodeUpdated => "node_updated",
            Self::NodeRemoved => "node_removed",
            Self::NodeEvent => "node_event",
            Self::AttributeUpdated => "attribute_updated",
            Self::ServerShutdown => "server_shutdown",
            Self::ServerInfoUpdated => "server_info_updated",
            Self::EndpointAdded => "endpoint_added",
            Self::EndpointRemoved => "endpoint_removed",
            Self::ConnectionLost => "connection_lost",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
