//! Stand-in Matter server.
//!
//! Speaks the Matter server WebSocket protocol against a few simulated nodes
//! so the client can be exercised without a real controller:
//! - Sends the server info handshake on connect
//! - Answers the node, ping and device commands
//! - Pushes node and attribute events to clients that started listening
//!
//! Run it and point the monitor at it:
//!   cargo run -p matterlink-demo-mock-server -- --port 5580 --schema 11

mod fixtures;
mod server;

use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("matterlink_demo_mock_server=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(5580);
    let schema = parse_arg(&args, "--schema").unwrap_or(matterlink_core::CLIENT_SCHEMA_VERSION);

    let addr: SocketAddr = ([127, 0, 0, 1], u16::try_from(port)?).into();
    tracing::info!("Starting mock Matter server (schema {}) on {}", schema, addr);

    server::run(addr, schema).await
}

fn parse_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
