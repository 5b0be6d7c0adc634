//! Matter server monitor.
//!
//! Connects to a Matter server, prints what it negotiated and the nodes it
//! knows, then logs every push event until interrupted or disconnected.
//!
//! Against the local mock server:
//!   cargo run -p matterlink-demo-mock-server -- --port 5580
//!   cargo run -p matterlink-demo-monitor -- --url ws://localhost:5580/ws

use matterlink_client::{ClientConfig, EventKind, MatterClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("matterlink_demo_monitor=info".parse()?)
                .add_directive("matterlink_client=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let url = parse_arg_string(&args, "--url").unwrap_or_else(|| "ws://localhost:5580/ws".into());
    let mut config = ClientConfig::new(url);
    if let Some(schema) = parse_arg(&args, "--min-schema") {
        config = config.with_min_server_schema(schema);
    }
    if let Some(secs) = parse_arg(&args, "--request-timeout") {
        config = config.with_request_timeout(Duration::from_secs(secs.into()));
    }

    tracing::info!("Connecting to {}", config.url);
    let client = MatterClient::new(config);
    let info = client.connect().await?;
    tracing::info!(
        "Server schema {} (accepts clients from {}), fabric {}, bluetooth {}",
        info.schema_version,
        info.min_supported_schema_version,
        info.compressed_fabric_id,
        info.bluetooth_enabled
    );

    let lost = Arc::new(Notify::new());
    let _subscriptions: Vec<_> = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let lost = lost.clone();
            client.add_event_listener(kind, move |data| {
                tracing::info!("{}: {}", kind, data);
                if kind == EventKind::ConnectionLost {
                    lost.notify_one();
                }
            })
        })
        .collect();

    let nodes = client.start_listening().await?;
    for node in &nodes {
        tracing::info!(
            "Node {} {} ({} {}), available: {}",
            node.node_id,
            node.label().unwrap_or("-"),
            node.vendor_name().unwrap_or("?"),
            node.product_name().unwrap_or("?"),
            node.available
        );
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, closing connection");
            client.disconnect();
        }
        _ = lost.notified() => {
            anyhow::bail!("Connection to the Matter server was lost");
        }
    }
    Ok(())
}

fn parse_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
