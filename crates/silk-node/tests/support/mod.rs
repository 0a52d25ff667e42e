//! Shared helpers for the integration tests.
//!
//! Every test node binds fresh loopback TCP ports. Ports are picked
//! by binding an ephemeral listener and releasing it immediately.

#![allow(dead_code)]

use std::time::Duration;

use silk_node::{Endpoints, Node, NodeConfig};

/// Initializes tracing for test output (ignored if already set).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("silk_node=debug,silk_transport=debug")
        .try_init();
}

/// Picks a free loopback TCP port.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

/// A config on fresh loopback ports.
pub fn test_config(name: &str) -> NodeConfig {
    let mut config = NodeConfig::new(Endpoints::new(
        format!("tcp://127.0.0.1:{}", free_port()),
        format!("tcp://127.0.0.1:{}", free_port()),
    ));
    config.name = Some(name.to_owned());
    config
}

/// Creates and starts a node.
pub async fn started(name: &str) -> Node {
    started_with(test_config(name)).await
}

/// Creates and starts a node from an explicit config.
pub async fn started_with(config: NodeConfig) -> Node {
    let mut node = Node::new(config).expect("valid config");
    node.start().await.expect("start");
    node
}

/// Lets handshakes and subscribe connections settle (covers the
/// 200 ms slow-joiner buffer with margin).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}
