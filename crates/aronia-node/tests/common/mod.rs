use aronia_core::frame::Frame;
use aronia_core::{crypto, hexkey, Pubkey};
use aronia_node::{MemorySwarm, Node, NodeConfig, NodeEvent, Swarm, SwarmStream};
use ed25519_dalek::SigningKey;
use std::time::Duration;
use tokio::sync::broadcast;

/// Short heartbeat settings so liveness scenarios run in test time.
pub fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.heartbeat_interval_ms = 100;
    config.heartbeat_timeout_ms = 400;
    config.default_request_timeout_ms = 5_000;
    config
}

pub struct TestNode {
    pub node: Node,
    pub pubkey: Pubkey,
    pub events: broadcast::Receiver<NodeEvent>,
}

impl TestNode {
    pub fn pubkey_hex(&self) -> String {
        hexkey::encode(&self.pubkey)
    }
}

pub fn start_node_with_key(
    swarm: &MemorySwarm,
    topic: &str,
    key: SigningKey,
    config: NodeConfig,
) -> TestNode {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let pubkey = key.verifying_key().to_bytes();
    let endpoint = swarm.endpoint(pubkey);
    let node = Node::start(key, topic, config, endpoint).unwrap();
    let events = node.subscribe();
    TestNode {
        node,
        pubkey,
        events,
    }
}

pub fn start_node(swarm: &MemorySwarm, topic: &str, config: NodeConfig) -> TestNode {
    start_node_with_key(swarm, topic, crypto::generate_keypair(), config)
}

/// Two nodes with each other whitelisted, joined to `topic` and waited
/// into mutual `online` sessions.
pub async fn connected_pair(topic: &str) -> (MemorySwarm, TestNode, TestNode) {
    let swarm = MemorySwarm::new();
    let key_a = crypto::generate_keypair();
    let key_b = crypto::generate_keypair();

    let mut config_a = test_config();
    config_a.whitelist = vec![hexkey::encode(&key_b.verifying_key().to_bytes())];
    let mut config_b = test_config();
    config_b.whitelist = vec![hexkey::encode(&key_a.verifying_key().to_bytes())];

    let a = start_node_with_key(&swarm, topic, key_a, config_a);
    let b = start_node_with_key(&swarm, topic, key_b, config_b);

    wait_for_peer(&a.node, &b.pubkey).await;
    wait_for_peer(&b.node, &a.pubkey).await;

    (swarm, a, b)
}

/// Polls until `peer` shows up online in the node's session set.
pub async fn wait_for_peer(node: &Node, peer: &Pubkey) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if node
            .peers()
            .iter()
            .any(|info| info.pubkey == *peer && info.online)
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timeout waiting for peer session"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A hand-driven protocol peer: joins the topic and speaks raw frames
/// over the stream the swarm hands back, without any node runtime.
/// Useful for feeding a real node crafted or malformed traffic.
pub struct RawPeer {
    pub key: SigningKey,
    pub pubkey: Pubkey,
    pub stream: SwarmStream,
}

impl RawPeer {
    /// Joins `topic` and takes the first stream delivered — the
    /// connection to the node under test.
    pub async fn connect(swarm: &MemorySwarm, topic: [u8; 32], key: SigningKey) -> Self {
        let pubkey = key.verifying_key().to_bytes();
        let endpoint = swarm.endpoint(pubkey);
        let mut conn_rx = endpoint.join(topic, true, true).unwrap();
        let stream = tokio::time::timeout(Duration::from_secs(5), conn_rx.recv())
            .await
            .expect("timeout waiting for stream")
            .expect("swarm closed");
        Self {
            key,
            pubkey,
            stream,
        }
    }

    /// Builds, signs, and sends one frame with this peer's key.
    pub async fn send_signed(&self, frame_type: u8, payload: Vec<u8>) {
        let now = crypto::unix_now_ms().unwrap();
        let frame = Frame::build_signed(&self.key, frame_type, 0, now, payload);
        self.send_raw(frame.serialize()).await;
    }

    /// Sends arbitrary bytes as one transport message.
    pub async fn send_raw(&self, bytes: Vec<u8>) {
        self.stream.outbound.send(bytes).await.unwrap();
    }

    /// Receives and parses the next frame from the node.
    pub async fn recv_frame(&mut self) -> Frame {
        let bytes = tokio::time::timeout(Duration::from_secs(5), self.stream.inbound.recv())
            .await
            .expect("timeout waiting for frame")
            .expect("stream closed");
        Frame::parse(&bytes).unwrap()
    }
}

/// Receives events until one matches, panicking after five seconds.
pub async fn next_event_matching<F>(
    events: &mut broadcast::Receiver<NodeEvent>,
    mut predicate: F,
) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    result.expect("timeout waiting for event")
}
