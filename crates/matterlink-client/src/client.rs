//! The typed command surface.

use crate::config::ClientConfig;
use crate::correlator::{Correlator, PendingReply};
use crate::error::{ClientError, ConnectionError};
use crate::events::{EventDispatcher, Subscription};
use crate::handshake;
use crate::nodes::NodeCache;
use crate::transport::{FrameHandler, Transport};
use matterlink_core::{
    Command, CommissionableNodeData, CommissioningParameters, ConnectionState, EventKind,
    EventMessage, InboundMessage, MatterFabricData, MatterNode, MatterSoftwareVersion,
    NodePingResult, ServerInfo, VendorNames,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Options for [`MatterClient::open_commissioning_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissioningWindow {
    /// Seconds the window stays open.
    pub timeout: u32,
    /// PAKE iteration count.
    pub iteration: u32,
    /// 0 for the basic method, 1 for the enhanced method.
    pub option: u8,
    pub discriminator: Option<u16>,
}

impl Default for CommissioningWindow {
    fn default() -> Self {
        Self {
            timeout: 300,
            iteration: 1000,
            option: 1,
            discriminator: None,
        }
    }
}

/// Options for [`MatterClient::commission_on_network`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkCommissioning {
    /// Discovery filter type; 0 means no filter.
    pub filter_type: u8,
    pub filter: Option<Value>,
    /// Skip discovery and commission this address directly.
    pub ip_addr: Option<String>,
}

/// Command arguments. `None` values are left out of the object.
#[derive(Default)]
struct Args(Map<String, Value>);

impl Args {
    fn new() -> Self {
        Self::default()
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn with_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    fn node(node_id: u64) -> Self {
        Self::new().with("node_id", node_id)
    }
}

impl From<Args> for Value {
    fn from(args: Args) -> Self {
        Value::Object(args.0)
    }
}

struct Inner {
    config: ClientConfig,
    transport: Transport,
    state: Mutex<ConnectionState>,
    server_info: RwLock<Option<Arc<ServerInfo>>>,
    correlator: Correlator,
    events: EventDispatcher,
    nodes: NodeCache,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn server_info(&self) -> Option<Arc<ServerInfo>> {
        self.server_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_server_info(&self, info: Arc<ServerInfo>) {
        *self
            .server_info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Update client-side state from an event before listeners see it.
    fn apply_event(&self, kind: EventKind, data: &Value) {
        match kind {
            EventKind::NodeAdded | EventKind::NodeUpdated => {
                match serde_json::from_value::<MatterNode>(data.clone()) {
                    Ok(node) => self.nodes.upsert(node),
                    Err(e) => tracing::warn!("Invalid node in {} event: {}", kind, e),
                }
            }
            EventKind::NodeRemoved => match data.as_u64() {
                Some(node_id) => {
                    self.nodes.remove(node_id);
                }
                None => tracing::warn!("Invalid node id in {} event: {}", kind, data),
            },
            EventKind::AttributeUpdated => {
                let update = data.as_array().and_then(|parts| match parts.as_slice() {
                    [node_id, path, value] => Some((node_id.as_u64()?, path.as_str()?, value)),
                    _ => None,
                });
                match update {
                    Some((node_id, path, value)) => {
                        if !self.nodes.update_attribute(node_id, path, value.clone()) {
                            tracing::debug!("Attribute update for uncached node {}", node_id);
                        }
                    }
                    None => tracing::warn!("Invalid {} event: {}", kind, data),
                }
            }
            EventKind::ServerInfoUpdated => {
                match serde_json::from_value::<ServerInfo>(data.clone()) {
                    Ok(info) => self.set_server_info(Arc::new(info)),
                    Err(e) => tracing::warn!("Invalid {} event: {}", kind, e),
                }
            }
            _ => {}
        }
    }

    fn handle_event(&self, event: EventMessage) {
        let Some(kind) = event.kind() else {
            tracing::debug!("Ignoring unknown event {}", event.event);
            return;
        };
        tracing::debug!("Received event: {}", kind);
        self.apply_event(kind, &event.data);
        self.events.dispatch(kind, &event.data);
    }
}

impl FrameHandler for Inner {
    fn on_frame(&self, text: &str) {
        let msg = match InboundMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                return;
            }
        };
        match msg {
            InboundMessage::Success(result) => {
                self.correlator.on_success(result);
            }
            InboundMessage::Error(error) => {
                self.correlator.on_error(error);
            }
            InboundMessage::Event(event) => self.handle_event(event),
        }
    }

    fn on_disconnected(&self) {
        tracing::warn!("Connection to {} lost", self.config.url);
        *self.state() = ConnectionState::Closed;
        self.correlator.fail_all();
        self.events.dispatch(EventKind::ConnectionLost, &Value::Null);
    }
}

/// Puts a cancelled `connect` back to `Unconnected`.
struct ConnectAttempt<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Unconnected;
        }
    }
}

/// Client for a Matter server.
///
/// One instance owns one connection. After [`MatterClient::disconnect`] or a
/// lost connection the instance is closed for good; build a new one (and
/// re-register listeners) to reconnect.
pub struct MatterClient {
    inner: Arc<Inner>,
}

impl MatterClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Transport::new(),
                state: Mutex::new(ConnectionState::Unconnected),
                server_info: RwLock::new(None),
                correlator: Correlator::new(),
                events: EventDispatcher::new(),
                nodes: NodeCache::default(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The negotiated server information, once connected.
    pub fn server_info(&self) -> Option<Arc<ServerInfo>> {
        self.inner.server_info()
    }

    /// Open the connection and complete the handshake.
    ///
    /// A failed attempt leaves the client unconnected, so it may be retried.
    pub async fn connect(&self) -> Result<Arc<ServerInfo>, ClientError> {
        {
            let mut state = self.inner.state();
            match *state {
                ConnectionState::Unconnected => *state = ConnectionState::Connecting,
                ConnectionState::Closed => return Err(ConnectionError::Closed.into()),
                ConnectionState::Connecting | ConnectionState::Open => {
                    return Err(ConnectionError::AlreadyConnected.into());
                }
            }
        }

        let mut attempt = ConnectAttempt {
            inner: &self.inner,
            armed: true,
        };
        let config = &self.inner.config;
        let handler: Arc<dyn FrameHandler> = self.inner.clone();
        let inner = self.inner.clone();
        let outcome = self
            .inner
            .transport
            .connect(&config.url, config.connect_timeout, handler, move |frame| {
                let info = Arc::new(handshake::negotiate(frame, inner.config.min_server_schema)?);
                inner.set_server_info(info.clone());
                Ok(info)
            })
            .await;
        attempt.armed = false;

        let mut state = self.inner.state();
        match outcome {
            Ok(info) if *state == ConnectionState::Connecting => {
                *state = ConnectionState::Open;
                Ok(info)
            }
            Ok(_) => {
                // disconnect() or a dropped socket closed us mid-handshake
                drop(state);
                self.inner.transport.disconnect();
                Err(ConnectionError::Closed.into())
            }
            Err(e) => {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Unconnected;
                }
                Err(e.into())
            }
        }
    }

    /// Close the connection and reject outstanding requests with
    /// `ConnectionLost`. Idempotent.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state();
            if matches!(*state, ConnectionState::Unconnected | ConnectionState::Closed) {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.inner.transport.disconnect();
        self.inner.correlator.fail_all();
    }

    /// Register a listener for one event kind.
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, listener)
    }

    /// Nodes known from `start_listening` and later events.
    pub fn nodes(&self) -> Vec<Arc<MatterNode>> {
        self.inner.nodes.snapshot()
    }

    pub fn node(&self, node_id: u64) -> Option<Arc<MatterNode>> {
        self.inner.nodes.get(node_id)
    }

    /// Requests sent but not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.outstanding()
    }

    fn open_server_info(&self) -> Result<Arc<ServerInfo>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.inner.server_info().ok_or(ClientError::NotConnected)
    }

    fn issue(&self, command: Command, args: Value) -> Result<PendingReply, ClientError> {
        let info = self.open_server_info()?;
        self.inner.correlator.issue(
            &self.inner.transport,
            &info,
            command,
            args,
            command.min_schema(),
        )
    }

    /// Send any command and wait for its raw result.
    pub async fn send_command(&self, command: Command, args: Value) -> Result<Value, ClientError> {
        let reply = self.issue(command, args)?;
        reply.wait(self.inner.config.request_timeout).await
    }

    /// Send a command without waiting for (or tracking) its response.
    pub fn send_command_no_wait(&self, command: Command, args: Value) -> Result<(), ClientError> {
        let info = self.open_server_info()?;
        self.inner.correlator.issue_detached(
            &self.inner.transport,
            &info,
            command,
            args,
            command.min_schema(),
        )?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        command: Command,
        args: impl Into<Value>,
    ) -> Result<T, ClientError> {
        let result = self.send_command(command, args.into()).await?;
        serde_json::from_value(result).map_err(|source| ClientError::Decode { command, source })
    }

    async fn call_unit(&self, command: Command, args: impl Into<Value>) -> Result<(), ClientError> {
        self.send_command(command, args.into()).await.map(drop)
    }

    /// Fetch every node and start receiving node events.
    pub async fn start_listening(&self) -> Result<Vec<MatterNode>, ClientError> {
        let nodes: Vec<MatterNode> = self.call(Command::StartListening, Args::new()).await?;
        self.inner.nodes.replace_all(nodes.iter().cloned());
        tracing::info!("Matter client initialized with {} nodes", nodes.len());
        Ok(nodes)
    }

    pub async fn get_nodes(&self) -> Result<Vec<MatterNode>, ClientError> {
        self.call(Command::GetNodes, Args::new()).await
    }

    pub async fn get_node(&self, node_id: u64) -> Result<MatterNode, ClientError> {
        self.call(Command::GetNode, Args::node(node_id)).await
    }

    /// Full server dump: info, nodes and recent events.
    pub async fn server_diagnostics(&self) -> Result<Value, ClientError> {
        self.send_command(Command::ServerDiagnostics, Args::new().into()).await
    }

    /// Ask the server for its current info. Does not replace the snapshot
    /// negotiated at connect time.
    pub async fn fetch_server_info(&self) -> Result<ServerInfo, ClientError> {
        self.call(Command::ServerInfo, Args::new()).await
    }

    /// Commission a device with a QR code or manual pairing code.
    pub async fn commission_with_code(
        &self,
        code: &str,
        network_only: bool,
    ) -> Result<MatterNode, ClientError> {
        let args = Args::new()
            .with("code", code)
            .with("network_only", network_only);
        self.call(Command::CommissionWithCode, args).await
    }

    /// Commission a device that is already on the network.
    pub async fn commission_on_network(
        &self,
        setup_pin_code: u32,
        options: NetworkCommissioning,
    ) -> Result<MatterNode, ClientError> {
        let args = Args::new()
            .with("setup_pin_code", setup_pin_code)
            .with("filter_type", options.filter_type)
            .with_opt("filter", options.filter)
            .with_opt("ip_addr", options.ip_addr);
        self.call(Command::CommissionOnNetwork, args).await
    }

    pub async fn set_wifi_credentials(
        &self,
        ssid: &str,
        credentials: &str,
    ) -> Result<(), ClientError> {
        let args = Args::new()
            .with("ssid", ssid)
            .with("credentials", credentials);
        self.call_unit(Command::SetWifiCredentials, args).await
    }

    /// Set the Thread operational dataset (hex encoded).
    pub async fn set_thread_dataset(&self, dataset: &str) -> Result<(), ClientError> {
        self.call_unit(Command::SetThreadDataset, Args::new().with("dataset", dataset)).await
    }

    /// Open a commissioning window so another controller can join the node.
    pub async fn open_commissioning_window(
        &self,
        node_id: u64,
        window: CommissioningWindow,
    ) -> Result<CommissioningParameters, ClientError> {
        let args = Args::node(node_id)
            .with("timeout", window.timeout)
            .with("iteration", window.iteration)
            .with("option", window.option)
            .with_opt("discriminator", window.discriminator);
        self.call(Command::OpenCommissioningWindow, args).await
    }

    pub async fn discover_commissionable_nodes(
        &self,
    ) -> Result<Vec<CommissionableNodeData>, ClientError> {
        self.call(Command::DiscoverCommissionableNodes, Args::new()).await
    }

    pub async fn interview_node(&self, node_id: u64) -> Result<(), ClientError> {
        self.call_unit(Command::InterviewNode, Args::node(node_id)).await
    }

    /// Invoke a cluster command on one endpoint of a node.
    pub async fn device_command(
        &self,
        node_id: u64,
        endpoint_id: u16,
        cluster_id: u32,
        command_name: &str,
        payload: Value,
    ) -> Result<Value, ClientError> {
        let args = Args::node(node_id)
            .with("endpoint_id", endpoint_id)
            .with("cluster_id", cluster_id)
            .with("command_name", command_name)
            .with("payload", payload);
        self.send_command(Command::DeviceCommand, args.into()).await
    }

    pub async fn remove_node(&self, node_id: u64) -> Result<(), ClientError> {
        self.call_unit(Command::RemoveNode, Args::node(node_id)).await
    }

    pub async fn get_vendor_names(
        &self,
        filter_vendors: Option<&[u16]>,
    ) -> Result<VendorNames, ClientError> {
        let args = Args::new().with_opt("filter_vendors", filter_vendors.map(<[u16]>::to_vec));
        self.call(Command::GetVendorNames, args).await
    }

    /// Read attributes by `endpoint/cluster/attribute` path. Wildcards are
    /// resolved by the server.
    pub async fn read_attribute(
        &self,
        node_id: u64,
        paths: &[&str],
    ) -> Result<BTreeMap<String, Value>, ClientError> {
        let attribute_path: Value = match paths {
            [single] => Value::from(*single),
            many => Value::from(many.to_vec()),
        };
        let args = Args::node(node_id).with("attribute_path", attribute_path);
        self.call(Command::ReadAttribute, args).await
    }

    pub async fn write_attribute(
        &self,
        node_id: u64,
        attribute_path: &str,
        value: Value,
    ) -> Result<Value, ClientError> {
        let args = Args::node(node_id)
            .with("attribute_path", attribute_path)
            .with("value", value);
        self.send_command(Command::WriteAttribute, args.into()).await
    }

    /// Ping the node on every address the server knows for it.
    pub async fn ping_node(&self, node_id: u64) -> Result<NodePingResult, ClientError> {
        self.call(Command::PingNode, Args::node(node_id)).await
    }

    /// Import test nodes from a diagnostics dump.
    pub async fn import_test_node(&self, dump: &str) -> Result<(), ClientError> {
        self.call_unit(Command::ImportTestNode, Args::new().with("dump", dump)).await
    }

    pub async fn get_node_ip_addresses(
        &self,
        node_id: u64,
        prefer_cache: bool,
        scoped: bool,
    ) -> Result<Vec<String>, ClientError> {
        let args = Args::node(node_id)
            .with("prefer_cache", prefer_cache)
            .with("scoped", scoped);
        self.call(Command::GetNodeIpAddresses, args).await
    }

    pub async fn get_matter_fabrics(
        &self,
        node_id: u64,
    ) -> Result<Vec<MatterFabricData>, ClientError> {
        self.call(Command::GetMatterFabrics, Args::node(node_id)).await
    }

    pub async fn remove_matter_fabric(
        &self,
        node_id: u64,
        fabric_index: u8,
    ) -> Result<(), ClientError> {
        let args = Args::node(node_id).with("fabric_index", fabric_index);
        self.call_unit(Command::RemoveMatterFabric, args).await
    }

    /// The newest applicable update for the node, if any.
    pub async fn check_node_update(
        &self,
        node_id: u64,
    ) -> Result<Option<MatterSoftwareVersion>, ClientError> {
        self.call(Command::CheckNodeUpdate, Args::node(node_id)).await
    }

    /// Start an OTA update to `software_version` (number or version string).
    pub async fn update_node(
        &self,
        node_id: u64,
        software_version: impl Into<Value>,
    ) -> Result<Option<MatterSoftwareVersion>, ClientError> {
        let args = Args::node(node_id).with("software_version", software_version);
        self.call(Command::UpdateNode, args).await
    }

    pub async fn set_acl_entry(&self, node_id: u64, entry: Value) -> Result<Value, ClientError> {
        let args = Args::node(node_id).with("entry", entry);
        self.send_command(Command::SetAclEntry, args.into()).await
    }

    pub async fn set_node_binding(
        &self,
        node_id: u64,
        endpoint: u16,
        bindings: Value,
    ) -> Result<Value, ClientError> {
        let args = Args::node(node_id)
            .with("endpoint", endpoint)
            .with("bindings", bindings);
        self.send_command(Command::SetNodeBinding, args.into()).await
    }
}

impl Drop for MatterClient {
    fn drop(&mut self) {
        // The reader task holds the inner state; close the socket so it ends.
        self.inner.transport.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn args_skip_none() {
        let args: Value = Args::node(4)
            .with("timeout", 300u32)
            .with_opt("discriminator", None::<u16>)
            .with_opt("ip_addr", Some("10.0.0.2"))
            .into();
        assert_eq!(args, json!({"node_id": 4, "timeout": 300, "ip_addr": "10.0.0.2"}));
    }

    #[test]
    fn commissioning_window_defaults() {
        let window = CommissioningWindow::default();
        assert_eq!((window.timeout, window.iteration, window.option), (300, 1000, 1));
        assert_eq!(window.discriminator, None);
    }

    #[tokio::test]
    async fn commands_need_a_connection() {
        let client = MatterClient::new(ClientConfig::new("ws://127.0.0.1:1/ws"));
        assert_eq!(client.state(), ConnectionState::Unconnected);
        assert!(matches!(
            client.ping_node(1).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.send_command_no_wait(Command::GetNodes, json!({})),
            Err(ClientError::NotConnected)
        ));
        // disconnecting a client that never connected is a no-op
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn events_update_the_node_cache() {
        let client = MatterClient::new(ClientConfig::new("ws://unused"));
        let inner = &client.inner;
        inner.on_frame(r#"{"event":"node_added","data":{"node_id":5,"attributes":{}}}"#);
        inner.on_frame(r#"{"event":"attribute_updated","data":[5,"1/6/0",true]}"#);
        assert_eq!(client.node(5).unwrap().attributes["1/6/0"], json!(true));

        inner.on_frame(r#"{"event":"node_removed","data":5}"#);
        assert!(client.node(5).is_none());
    }

    #[test]
    fn server_info_update_replaces_snapshot() {
        let client = MatterClient::new(ClientConfig::new("ws://unused"));
        client.inner.on_frame(
            r#"{"event":"server_info_updated","data":{
                "schema_version":9,"min_supported_schema_version":1,"bluetooth_enabled":true}}"#,
        );
        let info = client.server_info().unwrap();
        assert_eq!(info.schema_version, 9);
        assert!(info.bluetooth_enabled);
    }

    #[test]
    fn malformed_frames_are_ignored() {
        let client = MatterClient::new(ClientConfig::new("ws://unused"));
        client.inner.on_frame("not json");
        client.inner.on_frame(r#"{"hello":1}"#);
        client.inner.on_frame(r#"{"event":"node_added","data":"not a node"}"#);
        assert!(client.nodes().is_empty());
    }
}
