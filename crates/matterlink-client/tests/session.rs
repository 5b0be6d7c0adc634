//! End-to-end sessions against an in-process WebSocket server.

use futures_util::{SinkExt, StreamExt};
use matterlink_client::{
    ClientConfig, ClientError, Command, ConnectionError, ConnectionState, ErrorCode, EventKind,
    MatterClient,
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);
const SHORT: Duration = Duration::from_millis(100);

/// One-connection server. Records what the client sends and writes whatever
/// the test pushes.
struct MockServer {
    url: String,
    received: mpsc::UnboundedReceiver<Value>,
    push: Option<mpsc::UnboundedSender<String>>,
}

impl MockServer {
    /// Accept one client and greet it with `first`, or hang up at once if
    /// there is nothing to send.
    async fn start(first: Option<String>) -> Self {
        Self::start_after(first, Duration::ZERO).await
    }

    /// Like `start`, but hold the greeting back for `delay`.
    async fn start_after(first: Option<String>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut stream) = ws.split();
            time::sleep(delay).await;

            let Some(first) = first else {
                let _ = sink.close().await;
                return;
            };
            if sink.send(Message::Text(first.into())).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(serde_json::from_str(text.as_str()).unwrap());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    },
                    frame = push_rx.recv() => match frame {
                        Some(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            received,
            push: Some(push),
        }
    }

    async fn with_schema(schema_version: u32) -> Self {
        Self::start(Some(handshake(schema_version, 1))).await
    }

    /// A server that takes a while to send its handshake.
    async fn slow_handshake(schema_version: u32) -> Self {
        let delay = Duration::from_millis(300);
        Self::start_after(Some(handshake(schema_version, 1)), delay).await
    }

    fn client(&self) -> MatterClient {
        MatterClient::new(ClientConfig::new(&self.url))
    }

    async fn next_frame(&mut self) -> Value {
        time::timeout(WAIT, self.received.recv())
            .await
            .expect("client sent nothing")
            .expect("server task ended")
    }

    fn send(&self, frame: Value) {
        self.push.as_ref().unwrap().send(frame.to_string()).unwrap();
    }

    fn reply(&self, request: &Value, result: Value) {
        self.send(json!({"message_id": request["message_id"], "result": result}));
    }

    /// Close the socket from the server side.
    fn hang_up(&mut self) {
        self.push = None;
    }
}

fn handshake(schema_version: u32, min_supported: u32) -> String {
    json!({
        "fabric_id": 1,
        "compressed_fabric_id": 4242,
        "schema_version": schema_version,
        "min_supported_schema_version": min_supported,
        "sdk_version": "2024.11.4",
        "wifi_credentials_set": false,
        "thread_credentials_set": true,
        "bluetooth_enabled": false
    })
    .to_string()
}

fn node(node_id: u64) -> Value {
    json!({
        "node_id": node_id,
        "available": true,
        "attributes": {"0/40/5": format!("node {node_id}")}
    })
}

fn channel_listener(tx: mpsc::UnboundedSender<Value>) -> impl Fn(&Value) + Send + Sync + 'static {
    move |data| {
        let _ = tx.send(data.clone());
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn connect_negotiates_server_info() {
    let server = MockServer::with_schema(11).await;
    let client = server.client();

    let info = client.connect().await.unwrap();
    assert_eq!(info.schema_version, 11);
    assert_eq!(info.compressed_fabric_id, 4242);
    assert!(info.thread_credentials_set);
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.server_info().unwrap().sdk_version, "2024.11.4");

    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connection(ConnectionError::AlreadyConnected))
    ));
}

#[tokio::test]
async fn request_frame_and_result() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (node, ()) = tokio::join!(client.get_node(42), async {
        let request = server.next_frame().await;
        assert_eq!(
            request,
            json!({"message_id": "1", "command": "get_node", "args": {"node_id": 42}})
        );
        server.reply(&request, node(42));
    });

    let node = node.unwrap();
    assert_eq!(node.node_id, 42);
    assert_eq!(node.label(), Some("node 42"));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn schema_gate_sends_nothing() {
    let mut server = MockServer::with_schema(2).await;
    let client = server.client();
    client.connect().await.unwrap();

    match client.get_matter_fabrics(1).await {
        Err(ClientError::UnsupportedVersion {
            command,
            required,
            actual,
        }) => {
            assert_eq!(command, Command::GetMatterFabrics);
            assert_eq!(required, 3);
            assert_eq!(actual, 2);
        }
        other => panic!("expected a schema rejection, got {other:?}"),
    }

    // The next command is the first thing on the wire and still gets id 1.
    let (nodes, ()) = tokio::join!(client.get_nodes(), async {
        let request = server.next_frame().await;
        assert_eq!(request["message_id"], "1");
        assert_eq!(request["command"], "get_nodes");
        server.reply(&request, json!([]));
    });
    assert!(nodes.unwrap().is_empty());
}

#[tokio::test]
async fn responses_matched_out_of_order() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (first, second, ()) = tokio::join!(client.ping_node(1), client.ping_node(2), async {
        let a = server.next_frame().await;
        let b = server.next_frame().await;
        assert_eq!((a["message_id"].as_str(), b["message_id"].as_str()), (Some("1"), Some("2")));
        // answer the later request first
        for request in [&b, &a] {
            let ip = format!("fd00::{}", request["args"]["node_id"]);
            server.reply(request, json!({ ip: true }));
        }
    });

    assert_eq!(first.unwrap().keys().collect::<Vec<_>>(), vec!["fd00::1"]);
    assert_eq!(second.unwrap().keys().collect::<Vec<_>>(), vec!["fd00::2"]);
}

#[tokio::test]
async fn error_response_rejects_request() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (outcome, ()) = tokio::join!(client.interview_node(5), async {
        let request = server.next_frame().await;
        server.send(json!({
            "message_id": request["message_id"],
            "error_code": 7,
            "details": "bad node"
        }));
    });

    let err = outcome.unwrap_err();
    assert_eq!(err.error_code(), Some(ErrorCode::Other(7)));
    match err {
        ClientError::Remote { code, details } => {
            assert_eq!(code, 7);
            assert_eq!(details.as_deref(), Some("bad node"));
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn events_reach_every_listener() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (first_tx, mut first) = mpsc::unbounded_channel();
    let (second_tx, mut second) = mpsc::unbounded_channel();
    client.add_event_listener(EventKind::NodeRemoved, channel_listener(first_tx));
    client.add_event_listener(EventKind::NodeRemoved, channel_listener(second_tx));

    let (nodes, ()) = tokio::join!(client.start_listening(), async {
        let request = server.next_frame().await;
        assert_eq!(request["command"], "start_listening");
        server.reply(&request, json!([node(99), node(100)]));
    });
    assert_eq!(nodes.unwrap().len(), 2);
    assert!(client.node(99).is_some());

    server.send(json!({"event": "node_removed", "data": 99}));
    assert_eq!(recv(&mut first).await, json!(99));
    assert_eq!(recv(&mut second).await, json!(99));
    assert!(client.node(99).is_none());
    assert_eq!(client.nodes().len(), 1);
}

#[tokio::test]
async fn unsubscribed_listener_stops_receiving() {
    let server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (kept_tx, mut kept) = mpsc::unbounded_channel();
    let (dropped_tx, mut dropped) = mpsc::unbounded_channel();
    let sub = client.add_event_listener(EventKind::NodeEvent, channel_listener(dropped_tx));
    client.add_event_listener(EventKind::NodeEvent, channel_listener(kept_tx));
    sub.unsubscribe();

    server.send(json!({"event": "node_event", "data": {"node_id": 3}}));
    assert_eq!(recv(&mut kept).await["node_id"], 3);
    assert!(dropped.try_recv().is_err());
}

#[tokio::test]
async fn push_events_update_local_state() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (tx, mut updates) = mpsc::unbounded_channel();
    client.add_event_listener(EventKind::AttributeUpdated, channel_listener(tx.clone()));
    client.add_event_listener(EventKind::ServerInfoUpdated, channel_listener(tx));

    let (nodes, ()) = tokio::join!(client.start_listening(), async {
        let request = server.next_frame().await;
        server.reply(&request, json!([node(5)]));
    });
    nodes.unwrap();

    server.send(json!({"event": "attribute_updated", "data": [5, "1/6/0", true]}));
    recv(&mut updates).await;
    assert_eq!(client.node(5).unwrap().attributes["1/6/0"], json!(true));

    let mut info: Value = serde_json::from_str(&handshake(11, 1)).unwrap();
    info["bluetooth_enabled"] = json!(true);
    server.send(json!({"event": "server_info_updated", "data": info}));
    recv(&mut updates).await;
    assert!(client.server_info().unwrap().bluetooth_enabled);
}

#[tokio::test]
async fn connection_loss_rejects_pending_requests() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (lost_tx, mut lost) = mpsc::unbounded_channel();
    client.add_event_listener(EventKind::ConnectionLost, channel_listener(lost_tx));

    let (a, b, c, ()) = tokio::join!(
        client.get_node(1),
        client.get_node(2),
        client.get_node(3),
        async {
            for _ in 0..3 {
                server.next_frame().await;
            }
            server.hang_up();
        }
    );

    for outcome in [a, b, c] {
        assert!(matches!(outcome, Err(ClientError::ConnectionLost)));
    }
    assert_eq!(recv(&mut lost).await, Value::Null);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.pending_requests(), 0);

    assert!(matches!(
        client.get_nodes().await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connection(ConnectionError::Closed))
    ));
}

#[tokio::test]
async fn caller_disconnect_is_quiet() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (lost_tx, mut lost) = mpsc::unbounded_channel();
    client.add_event_listener(EventKind::ConnectionLost, channel_listener(lost_tx));

    let (outcome, ()) = tokio::join!(client.remove_node(8), async {
        server.next_frame().await;
        client.disconnect();
    });

    assert!(matches!(outcome, Err(ClientError::ConnectionLost)));
    assert_eq!(client.state(), ConnectionState::Closed);
    client.disconnect();

    time::sleep(Duration::from_millis(100)).await;
    assert!(lost.try_recv().is_err());
}

#[tokio::test]
async fn request_timeout_forgets_the_request() {
    let mut server = MockServer::with_schema(11).await;
    let client = MatterClient::new(
        ClientConfig::new(&server.url).with_request_timeout(Duration::from_millis(100)),
    );
    client.connect().await.unwrap();

    let (outcome, request) = tokio::join!(client.get_node(1), server.next_frame());
    assert!(matches!(
        outcome,
        Err(ClientError::Timeout {
            command: Command::GetNode,
            ..
        })
    ));
    assert_eq!(client.pending_requests(), 0);

    // a late answer is dropped without disturbing the session
    server.reply(&request, node(1));
    let (nodes, ()) = tokio::join!(client.get_nodes(), async {
        let request = server.next_frame().await;
        assert_eq!(request["message_id"], "2");
        server.reply(&request, json!([node(1)]));
    });
    assert_eq!(nodes.unwrap().len(), 1);
}

#[tokio::test]
async fn fire_and_forget_is_not_tracked() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    client
        .send_command_no_wait(Command::InterviewNode, json!({"node_id": 4}))
        .unwrap();
    assert_eq!(client.pending_requests(), 0);

    let request = server.next_frame().await;
    assert_eq!(
        request,
        json!({"message_id": "1", "command": "interview_node", "args": {"node_id": 4}})
    );
}

#[tokio::test]
async fn optional_arguments_are_omitted() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let (params, ()) = tokio::join!(
        client.open_commissioning_window(6, Default::default()),
        async {
            let request = server.next_frame().await;
            assert_eq!(
                request["args"],
                json!({"node_id": 6, "timeout": 300, "iteration": 1000, "option": 1})
            );
            server.reply(
                &request,
                json!({
                "setup_pin_code": 20202021,
                "setup_manual_code": "3497-011-2332",
                "setup_qr_code": "MT:-24J0AFN00KA0648G00"
            }),
            );
        }
    );
    assert_eq!(params.unwrap().setup_pin_code, 20202021);
}

#[tokio::test]
async fn server_closing_before_handshake() {
    let server = MockServer::start(None).await;
    let client = server.client();

    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connection(ConnectionError::ClosedBeforeHandshake))
    ));
    assert_eq!(client.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn invalid_handshake_is_fatal() {
    let server = MockServer::start(Some(r#"{"event":"node_added","data":{}}"#.into())).await;
    let client = server.client();

    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connection(ConnectionError::InvalidHandshake(_)))
    ));
    assert_eq!(client.state(), ConnectionState::Unconnected);
    assert!(client.server_info().is_none());
}

#[tokio::test]
async fn incompatible_server_is_refused() {
    let server = MockServer::start(Some(handshake(40, 30))).await;
    let client = server.client();

    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connection(ConnectionError::IncompatibleServer(_)))
    ));
    assert_eq!(client.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = MatterClient::new(ClientConfig::new(format!("ws://{addr}/ws")));
    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connection(ConnectionError::Open { .. }))
    ));
    assert_eq!(client.state(), ConnectionState::Unconnected);
}

#[tokio::test]
async fn cancelled_connect_can_be_retried() {
    // accepts TCP but never answers the WebSocket upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = MatterClient::new(ClientConfig::new(format!("ws://{addr}/ws")));
    let attempt = time::timeout(SHORT, client.connect()).await;
    assert!(attempt.is_err());
    assert_eq!(client.state(), ConnectionState::Unconnected);

    // a second attempt really starts instead of reporting a stale attempt
    let attempt = time::timeout(SHORT, client.connect()).await;
    assert!(attempt.is_err());
    assert_eq!(client.state(), ConnectionState::Unconnected);
    assert!(matches!(client.get_nodes().await, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn second_connect_while_handshake_pending() {
    let server = MockServer::slow_handshake(11).await;
    let client = server.client();

    let (first, second) = tokio::join!(client.connect(), async {
        time::sleep(Duration::from_millis(50)).await;
        client.connect().await
    });

    assert!(matches!(
        second,
        Err(ClientError::Connection(ConnectionError::AlreadyConnected))
    ));
    assert_eq!(first.unwrap().schema_version, 11);
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test]
async fn disconnect_during_handshake_fails_the_connect() {
    let server = MockServer::slow_handshake(11).await;
    let client = server.client();

    let (outcome, ()) = tokio::join!(client.connect(), async {
        time::sleep(Duration::from_millis(50)).await;
        client.disconnect();
    });

    assert!(matches!(
        outcome,
        Err(ClientError::Connection(ConnectionError::Closed))
    ));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(client.get_nodes().await, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn abandoned_request_is_forgotten() {
    let mut server = MockServer::with_schema(11).await;
    let client = server.client();
    client.connect().await.unwrap();

    let abandoned = time::timeout(SHORT, client.get_node(1)).await;
    assert!(abandoned.is_err());
    assert_eq!(client.pending_requests(), 0);

    let late = server.next_frame().await;
    server.reply(&late, node(1));
    let (nodes, ()) = tokio::join!(client.get_nodes(), async {
        let request = server.next_frame().await;
        assert_eq!(request["message_id"], "2");
        server.reply(&request, json!([]));
    });
    assert!(nodes.unwrap().is_empty());
}
