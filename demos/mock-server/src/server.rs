//! Mock server implementation.

use crate::fixtures;
use futures_util::{SinkExt, StreamExt};
use matterlink_core::{
    Command, CommandMessage, ErrorCode, ErrorResult, EventKind, EventMessage, InboundMessage,
    MatterNode, ServerInfo, SuccessResult,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;

/// Shared server state.
struct ServerState {
    info: ServerInfo,
    nodes: BTreeMap<u64, MatterNode>,
}

impl ServerState {
    fn new(schema_version: u32) -> Self {
        Self {
            info: ServerInfo {
                schema_version,
                min_supported_schema_version: 1,
                fabric_id: 1,
                compressed_fabric_id: 0x2906_c908_d115_d362,
                sdk_version: "mock".into(),
                wifi_credentials_set: false,
                thread_credentials_set: false,
                bluetooth_enabled: false,
            },
            nodes: fixtures::nodes()
                .into_iter()
                .map(|node| (node.node_id, node))
                .collect(),
        }
    }

    fn node(&self, args: &Value) -> Result<&MatterNode, Failure> {
        let node_id = node_id(args)?;
        self.nodes
            .get(&node_id)
            .ok_or_else(|| Failure::not_found(node_id))
    }
}

type SharedState = Arc<RwLock<ServerState>>;

/// A command the server could not carry out.
struct Failure {
    code: ErrorCode,
    details: String,
}

impl Failure {
    fn invalid(details: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidCommand,
            details: details.into(),
        }
    }

    fn not_found(node_id: u64) -> Self {
        Self {
            code: ErrorCode::NotFound,
            details: format!("Node {node_id} does not exist or is not yet interviewed"),
        }
    }
}

/// Outcome of one command: the reply and any events it caused.
type Handled = Result<(Value, Vec<EventMessage>), Failure>;

pub async fn run(addr: SocketAddr, schema_version: u32) -> anyhow::Result<()> {
    let state = Arc::new(RwLock::new(ServerState::new(schema_version)));
    let (events_tx, _) = broadcast::channel::<String>(100);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}/ws", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        let events_tx = events_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, state, events_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
    events_tx: broadcast::Sender<String>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    tracing::debug!("New connection from {}", addr);

    // Handshake
    {
        let s = state.read().await;
        sink.send(Message::Text(serde_json::to_string(&s.info)?.into()))
            .await?;
    }

    let mut events_rx = events_tx.subscribe();
    let mut listening = false;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };
                let Message::Text(text) = msg else { continue };

                let request: CommandMessage = match serde_json::from_str(text.as_str()) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!("Invalid command from {}: {}", addr, e);
                        if let Some(id) = raw_message_id(text.as_str()) {
                            let reply = error_reply(id, Failure::invalid(e.to_string()));
                            sink.send(Message::Text(reply?.into())).await?;
                        }
                        continue;
                    }
                };

                tracing::info!(
                    "{} -> {} (message_id {})",
                    addr,
                    request.command,
                    request.message_id
                );
                if request.command == Command::StartListening {
                    listening = true;
                }

                let outcome = handle_command(&state, &request).await;
                let reply = match outcome {
                    Ok((result, events)) => {
                        for event in events {
                            let _ = events_tx.send(serde_json::to_string(&event)?);
                        }
                        let reply = InboundMessage::Success(SuccessResult {
                            message_id: request.message_id,
                            result,
                        });
                        serde_json::to_string(&reply)?
                    }
                    Err(failure) => error_reply(request.message_id, failure)?,
                };
                sink.send(Message::Text(reply.into())).await?;
            }

            event = events_rx.recv() => {
                match event {
                    Ok(event) if listening => sink.send(Message::Text(event.into())).await?,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("{} missed {} events", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

async fn handle_command(state: &SharedState, request: &CommandMessage) -> Handled {
    let args = &request.args;
    let schema_version = state.read().await.info.schema_version;
    match request.command.min_schema() {
        Some(required) if required > schema_version => {
            return Err(Failure::invalid(format!(
                "{} requires schema {}",
                request.command, required
            )));
        }
        _ => {}
    }

    match request.command {
        Command::StartListening | Command::GetNodes => {
            let s = state.read().await;
            Ok((json!(s.nodes.values().collect::<Vec<_>>()), vec![]))
        }
        Command::GetNode => {
            let s = state.read().await;
            Ok((to_value(s.node(args)?)?, vec![]))
        }
        Command::ServerInfo => Ok((to_value(&state.read().await.info)?, vec![])),
        Command::ServerDiagnostics => {
            let s = state.read().await;
            let diagnostics = json!({
                "info": s.info,
                "nodes": s.nodes.values().collect::<Vec<_>>(),
                "events": [],
            });
            Ok((diagnostics, vec![]))
        }
        Command::PingNode => {
            let s = state.read().await;
            let node = s.node(args)?;
            let address = format!("fd00::{:x}", node.node_id);
            Ok((json!({ address: node.available }), vec![]))
        }
        Command::GetNodeIpAddresses => {
            let s = state.read().await;
            let node = s.node(args)?;
            Ok((json!([format!("fd00::{:x}", node.node_id)]), vec![]))
        }
        Command::InterviewNode => {
            let s = state.read().await;
            let node = s.node(args)?;
            let event = EventMessage::new(EventKind::NodeUpdated, to_value(node)?);
            Ok((Value::Null, vec![event]))
        }
        Command::RemoveNode => {
            let node_id = node_id(args)?;
            let mut s = state.write().await;
            s.nodes
                .remove(&node_id)
                .ok_or_else(|| Failure::not_found(node_id))?;
            let event = EventMessage::new(EventKind::NodeRemoved, json!(node_id));
            Ok((Value::Null, vec![event]))
        }
        Command::DeviceCommand => device_command(state, args).await,
        Command::GetVendorNames => Ok((json!({"65521": "Acme Lighting"}), vec![])),
        Command::CheckNodeUpdate => {
            state.read().await.node(args)?;
            Ok((Value::Null, vec![]))
        }
        other => Err(Failure::invalid(format!("{other} is not simulated"))),
    }
}

/// OnOff cluster commands flip `<endpoint>/6/0`.
async fn device_command(state: &SharedState, args: &Value) -> Handled {
    let node_id = node_id(args)?;
    let endpoint = args["endpoint_id"]
        .as_u64()
        .ok_or_else(|| Failure::invalid("missing endpoint_id"))?;
    if args["cluster_id"].as_u64() != Some(6) {
        return Err(Failure::invalid("only the OnOff cluster is simulated"));
    }

    let mut s = state.write().await;
    let node = s
        .nodes
        .get_mut(&node_id)
        .ok_or_else(|| Failure::not_found(node_id))?;
    let path = format!("{endpoint}/6/0");
    let current = node.attributes.get(&path).and_then(Value::as_bool);
    let on = match (args["command_name"].as_str(), current) {
        (Some("On"), _) => true,
        (Some("Off"), _) => false,
        (Some("Toggle"), Some(on)) => !on,
        (Some("Toggle"), None) => {
            return Err(Failure {
                code: ErrorCode::StackError,
                details: format!("endpoint {endpoint} has no OnOff attribute"),
            });
        }
        (name, _) => return Err(Failure::invalid(format!("unknown command {name:?}"))),
    };
    node.attributes.insert(path.clone(), json!(on));

    let event = EventMessage::new(EventKind::AttributeUpdated, json!([node_id, path, on]));
    Ok((Value::Null, vec![event]))
}

fn node_id(args: &Value) -> Result<u64, Failure> {
    args["node_id"]
        .as_u64()
        .ok_or_else(|| Failure::invalid("missing node_id"))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|e| Failure {
        code: ErrorCode::UnknownError,
        details: e.to_string(),
    })
}

fn error_reply(message_id: u64, failure: Failure) -> serde_json::Result<String> {
    serde_json::to_string(&InboundMessage::Error(ErrorResult {
        message_id,
        error_code: failure.code.into(),
        details: Some(failure.details),
    }))
}

/// The request id of a frame that did not parse as a command.
fn raw_message_id(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    match &value["message_id"] {
        Value::String(id) => id.parse().ok(),
        id => id.as_u64(),
    }
}
