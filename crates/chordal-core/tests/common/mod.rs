#![allow(dead_code)]

use std::time::Duration;

use tonic::transport::Channel;

use chordal_core::{Config, Node, Peer};
use chordal_proto::v1::chord_client::ChordClient;

/// One-byte identifier space with short maintenance intervals, so rings
/// stabilize within a few hundred milliseconds.
pub fn test_config() -> Config {
    Config {
        key_size: 8,
        id_length: 1,
        stabilize_interval: Duration::from_millis(60),
        fix_finger_interval: Duration::from_millis(25),
        retry_interval: Duration::from_millis(120),
        connection_timeout: Duration::from_secs(2),
    }
}

pub async fn start_node(parent: Option<Peer>, id: Option<u8>) -> Node {
    let mut builder = Node::builder("127.0.0.1:0").config(test_config());
    if let Some(id) = id {
        builder = builder.id(vec![id]);
    }
    if let Some(parent) = parent {
        builder = builder.parent(parent);
    }
    builder.start().await.expect("failed to start test node")
}

/// Three successive nodes at ids 0, 55 and 170, the latter two joining
/// through the first.
pub async fn ring_of_three() -> (Node, Node, Node) {
    let node1 = start_node(None, Some(0x00)).await;
    let node2 = start_node(Some(node1.peer()), Some(0x37)).await;
    let node3 = start_node(Some(node1.peer()), Some(0xaa)).await;
    (node1, node2, node3)
}

/// Long enough for several stabilize rounds and a full fix-fingers sweep.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(800)).await;
}

/// Raw peer-protocol client, for tests that poke ring state directly.
pub async fn chord_client(addr: &str) -> ChordClient<Channel> {
    ChordClient::connect(format!("http://{addr}"))
        .await
        .expect("failed to dial test node")
}

pub fn assert_peer_is(peer: &Option<Peer>, node: &Node) {
    match peer {
        Some(p) => assert_eq!(
            p.id,
            node.id(),
            "expected peer {}, got {}",
            chordal_core::id::id_to_string(node.id()),
            chordal_core::id::id_to_string(&p.id),
        ),
        None => panic!(
            "expected peer {}, got none",
            chordal_core::id::id_to_string(node.id())
        ),
    }
}
