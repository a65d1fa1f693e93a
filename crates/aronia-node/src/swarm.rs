//! The swarm interface a node consumes, plus an in-process implementation.
//!
//! The DHT swarm library is an external collaborator: it handles peer
//! discovery, NAT traversal, and transport encryption, and hands the node
//! authenticated duplex streams whose remote endpoint has proven
//! possession of a 32-byte static public key. The node only sees the
//! [`Swarm`] trait and [`SwarmStream`] values.
//!
//! [`MemorySwarm`] is an in-process swarm used by the integration tests
//! and available to embedders that want several nodes in one process. It
//! cross-connects every member of a topic and can silently sever a link
//! to simulate a network partition.

use aronia_core::Pubkey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// Per-direction channel capacity of an in-memory stream. Models the
/// transport's bounded write buffer: a full channel means "not writable".
const STREAM_CAPACITY: usize = 64;

/// Capacity of the connection-delivery channel returned by [`Swarm::join`].
const CONN_CAPACITY: usize = 64;

/// Errors reported by a swarm implementation.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// The endpoint already joined this topic.
    #[error("topic already joined")]
    AlreadyJoined,
    /// The endpoint has not joined the topic it is operating on.
    #[error("topic not joined")]
    NotJoined,
}

/// An authenticated, encrypted, message-boundary-preserving duplex stream
/// to one remote peer.
///
/// `outbound.try_send` models the transport's non-blocking `write`
/// (an `Err(Full)` means "not writable right now"); awaiting
/// `outbound.send` parks until the transport drains. The inbound receiver
/// yields whole frames; it closing means the stream closed.
#[derive(Debug)]
pub struct SwarmStream {
    /// The remote endpoint's verified static public key.
    pub remote_static_key: Pubkey,
    /// Frame writer towards the remote peer.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Frame reader from the remote peer.
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

/// The discovery/transport interface a node consumes.
pub trait Swarm: Send + Sync {
    /// Joins a topic as announcer and/or searcher. Newly established
    /// streams to topic members are delivered on the returned channel.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError`] if the topic is already joined.
    fn join(
        &self,
        topic: [u8; 32],
        announce: bool,
        search: bool,
    ) -> Result<mpsc::Receiver<SwarmStream>, SwarmError>;

    /// Attempts an immediate outbound connection to a specific peer on a
    /// joined topic. Returns `Ok(None)` when the peer is not currently
    /// reachable.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError`] if the topic has not been joined.
    fn open(&self, topic: [u8; 32], remote: Pubkey) -> Result<Option<SwarmStream>, SwarmError>;

    /// Leaves a topic, closing the connection-delivery channel.
    fn leave(&self, topic: [u8; 32]);
}

struct Member {
    pubkey: Pubkey,
    conn_tx: mpsc::Sender<SwarmStream>,
}

#[derive(Default)]
struct SwarmRegistry {
    topics: Mutex<HashMap<[u8; 32], Vec<Member>>>,
    /// Severed-link flags keyed by the ordered pubkey pair.
    links: Mutex<HashMap<(Pubkey, Pubkey), Arc<AtomicBool>>>,
}

impl SwarmRegistry {
    fn link_flag(&self, a: &Pubkey, b: &Pubkey) -> Arc<AtomicBool> {
        let key = if a <= b { (*a, *b) } else { (*b, *a) };
        let mut links = self.links.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        links.entry(key).or_default().clone()
    }
}

/// An in-process swarm connecting [`MemoryEndpoint`]s by topic.
#[derive(Clone, Default)]
pub struct MemorySwarm {
    registry: Arc<SwarmRegistry>,
}

impl MemorySwarm {
    /// Creates an empty in-process swarm.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the endpoint for one identity, usable as that node's
    /// [`Swarm`].
    #[must_use]
    pub fn endpoint(&self, identity: Pubkey) -> Arc<MemoryEndpoint> {
        Arc::new(MemoryEndpoint {
            identity,
            registry: self.registry.clone(),
        })
    }

    /// Silently drops all traffic between two peers, in both directions,
    /// without closing their streams. Simulates a network partition.
    pub fn sever(&self, a: &Pubkey, b: &Pubkey) {
        self.registry.link_flag(a, b).store(true, Ordering::Relaxed);
    }

    /// Restores traffic between two previously severed peers. New frames
    /// flow again; frames dropped while severed are gone.
    pub fn heal(&self, a: &Pubkey, b: &Pubkey) {
        self.registry.link_flag(a, b).store(false, Ordering::Relaxed);
    }
}

/// One identity's view of a [`MemorySwarm`].
pub struct MemoryEndpoint {
    identity: Pubkey,
    registry: Arc<SwarmRegistry>,
}

/// Builds a connected stream pair between `a` and `b`, delivering one
/// half to each side's connection channel. Frames are shuttled by relay
/// tasks that consult the pair's severed flag, so a severed link drops
/// frames silently instead of closing.
fn connect_pair(
    registry: &SwarmRegistry,
    a: Pubkey,
    a_conn: &mpsc::Sender<SwarmStream>,
    b: Pubkey,
    b_conn: &mpsc::Sender<SwarmStream>,
) {
    let severed = registry.link_flag(&a, &b);

    let (a_out_tx, a_out_rx) = mpsc::channel(STREAM_CAPACITY);
    let (a_in_tx, a_in_rx) = mpsc::channel(STREAM_CAPACITY);
    let (b_out_tx, b_out_rx) = mpsc::channel(STREAM_CAPACITY);
    let (b_in_tx, b_in_rx) = mpsc::channel(STREAM_CAPACITY);

    spawn_relay(a_out_rx, b_in_tx, severed.clone());
    spawn_relay(b_out_rx, a_in_tx, severed);

    let for_a = SwarmStream {
        remote_static_key: b,
        outbound: a_out_tx,
        inbound: a_in_rx,
    };
    let for_b = SwarmStream {
        remote_static_key: a,
        outbound: b_out_tx,
        inbound: b_in_rx,
    };

    if a_conn.try_send(for_a).is_err() {
        tracing::debug!("memory swarm: connection channel full, dropping stream pair");
        return;
    }
    if b_conn.try_send(for_b).is_err() {
        tracing::debug!("memory swarm: peer connection channel full, dropping stream pair");
    }
}

fn spawn_relay(
    mut from: mpsc::Receiver<Vec<u8>>,
    to: mpsc::Sender<Vec<u8>>,
    severed: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(frame) = from.recv().await {
            if severed.load(Ordering::Relaxed) {
                continue;
            }
            if to.send(frame).await.is_err() {
                break;
            }
        }
        // Writer half dropped: letting `to` drop closes the remote reader.
    });
}

impl Swarm for MemoryEndpoint {
    fn join(
        &self,
        topic: [u8; 32],
        _announce: bool,
        _search: bool,
    ) -> Result<mpsc::Receiver<SwarmStream>, SwarmError> {
        let (conn_tx, conn_rx) = mpsc::channel(CONN_CAPACITY);

        let mut topics = self
            .registry
            .topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let members = topics.entry(topic).or_default();
        if members.iter().any(|m| m.pubkey == self.identity) {
            return Err(SwarmError::AlreadyJoined);
        }

        for member in members.iter() {
            connect_pair(
                &self.registry,
                self.identity,
                &conn_tx,
                member.pubkey,
                &member.conn_tx,
            );
        }

        members.push(Member {
            pubkey: self.identity,
            conn_tx,
        });

        Ok(conn_rx)
    }

    fn open(&self, topic: [u8; 32], remote: Pubkey) -> Result<Option<SwarmStream>, SwarmError> {
        let topics = self
            .registry
            .topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(members) = topics.get(&topic) else {
            return Err(SwarmError::NotJoined);
        };
        if !members.iter().any(|m| m.pubkey == self.identity) {
            return Err(SwarmError::NotJoined);
        }
        let Some(peer) = members.iter().find(|m| m.pubkey == remote) else {
            return Ok(None);
        };
        if self
            .registry
            .link_flag(&self.identity, &remote)
            .load(Ordering::Relaxed)
        {
            // A severed link looks exactly like an unreachable peer.
            return Ok(None);
        }

        // Deliver both halves through the connection channels so each
        // side's admission path sees the stream the same way.
        let (probe_tx, mut probe_rx) = mpsc::channel(1);
        connect_pair(&self.registry, self.identity, &probe_tx, remote, &peer.conn_tx);
        Ok(probe_rx.try_recv().ok())
    }

    fn leave(&self, topic: [u8; 32]) {
        let mut topics = self
            .registry
            .topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(members) = topics.get_mut(&topic) {
            members.retain(|m| m.pubkey != self.identity);
            if members.is_empty() {
                topics.remove(&topic);
            }
        }
    }
}
