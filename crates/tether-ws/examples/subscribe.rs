//! Subscribe to a WebSocket endpoint and print everything that arrives.
//!
//! ```sh
//! cargo run --example subscribe -- ws://127.0.0.1:9001
//! ```

use std::sync::Arc;

use anyhow::Result;
use tether_core::{TetherConfig, Topic};
use tether_runtime::ConnectionRegistry;
use tether_ws::WsConnector;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_string());

    let registry = ConnectionRegistry::new(Arc::new(WsConnector::new()), TetherConfig::default())?;

    registry.on_message(|connection_id, message| {
        println!("[{connection_id}] {} {}: {}", message.topic, message.kind, message.payload);
    });
    registry.on_connection_state_change(|connection| {
        println!(
            "[{}] connected={} connecting={} attempts={}",
            connection.id,
            connection.state.is_connected,
            connection.state.is_connecting,
            connection.state.reconnect_attempts,
        );
    });
    registry.on_error(|connection_id, error| {
        eprintln!("[{connection_id:?}] error: {error}");
    });

    let id = registry.connect(url, [Topic::wildcard()], None);
    println!("connection {id} registered, ctrl-c to quit");

    tokio::signal::ctrl_c().await?;
    registry.cleanup().await;
    Ok(())
}
