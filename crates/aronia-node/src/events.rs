//! Node events surfaced to the embedding application.
//!
//! [`NodeEvent`] is the unified event type consumers receive from a
//! [`crate::Node`] subscription. All session- and swarm-level happenings
//! are mapped into this enum before delivery, so higher layers never
//! couple to wire or transport internals.

use aronia_core::introduction::Introduction;
use aronia_core::payload::Capabilities;
use aronia_core::Pubkey;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Snapshot of a peer session's public state.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// The peer's Ed25519 public key.
    pub pubkey: Pubkey,
    /// Last capabilities the peer announced, if any.
    pub capabilities: Option<Capabilities>,
    /// When the session was admitted, milliseconds since the Unix epoch.
    pub connected_at_ms: u64,
    /// When the last verified frame arrived, milliseconds since the
    /// Unix epoch.
    pub last_seen_ms: u64,
    /// Whether the session is still live.
    pub online: bool,
}

/// Events emitted by a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A whitelisted peer's stream was admitted and its session started.
    PeerConnected(PeerInfo),
    /// A peer session ended (teardown, liveness expiry, or stream close).
    PeerDisconnected {
        /// The disconnected peer's key.
        pubkey: Pubkey,
    },
    /// An inbound stream was refused by admission policy.
    PeerRejected {
        /// The refused remote key.
        pubkey: Pubkey,
        /// Why admission refused it.
        reason: String,
    },
    /// An accepted introduced peer is not yet reachable on the swarm.
    PeerPending {
        /// The introduced peer's key.
        pubkey: Pubkey,
    },
    /// A peer announced (or replaced) its capabilities.
    PeerCapabilities {
        /// The announcing peer's key.
        pubkey: Pubkey,
        /// The announced capability set.
        capabilities: Capabilities,
    },
    /// A fire-and-forget application event arrived from a peer.
    PeerMessage {
        /// Sending peer's key.
        from: Pubkey,
        /// Decoded JSON payload.
        payload: Value,
        /// Local receive time.
        received_at: DateTime<Utc>,
    },
    /// A reserved streaming frame arrived from a peer.
    StreamData {
        /// Sending peer's key.
        from: Pubkey,
        /// Raw payload bytes.
        data: Vec<u8>,
        /// Whether this was a STREAM_END frame.
        end: bool,
    },
    /// A valid introduction awaits manual approval.
    IntroductionReceived(Introduction),
    /// An introduction was accepted and its subject whitelisted.
    IntroductionAccepted {
        /// The introduced peer's key, now whitelisted.
        pubkey: Pubkey,
        /// The introducer the record was accepted from.
        introducer: Pubkey,
    },
    /// An introduction failed validation or was rejected by the operator.
    IntroductionRejected {
        /// Hex form of the introduced key (hex because a rejected record
        /// may carry an undecodable key field).
        pubkey: String,
        /// Why the introduction was rejected.
        reason: String,
    },
    /// A malformed, unverifiable, or misaddressed frame was dropped.
    ProtocolError {
        /// The session the frame arrived on.
        pubkey: Pubkey,
        /// What was wrong with it.
        detail: String,
    },
}
