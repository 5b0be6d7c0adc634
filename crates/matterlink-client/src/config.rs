//! Client configuration.

use std::time::Duration;

/// How long to wait for the socket to open and the handshake to arrive.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a [`MatterClient`](crate::MatterClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the server, e.g. `ws://localhost:5580/ws`.
    pub url: String,
    pub connect_timeout: Duration,
    /// Deadline for each request. `None` waits until the response arrives
    /// or the connection drops.
    pub request_timeout: Option<Duration>,
    /// Lowest server schema accepted during the handshake.
    pub min_server_schema: u32,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            min_server_schema: 0,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_min_server_schema(mut self, schema: u32) -> Self {
        self.min_server_schema = schema;
        self
    }
}
