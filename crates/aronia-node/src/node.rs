//! The node runtime: swarm integration, admission control, outbound
//! APIs, and the introduction/trust engine.

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{NodeEvent, PeerInfo};
use crate::metrics::counters;
use crate::registry::{MethodError, MethodRegistry, PeerContext};
use crate::session::{self, SessionHandle};
use crate::sessions::SessionTable;
use crate::swarm::{Swarm, SwarmStream};
use aronia_core::introduction::{Introduction, IntroductionError, ValidationLimits};
use aronia_core::payload::{self, Capabilities};
use aronia_core::types::frame_type;
use aronia_core::{crypto, hexkey, Pubkey};
use ed25519_dalek::SigningKey;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Capacity of the node event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Best-effort per-peer outcome of a [`Node::broadcast`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Peers whose write completed.
    pub sent: usize,
    /// Peers whose write failed or whose session was gone.
    pub offline: usize,
}

/// A validated introduction awaiting an operator decision.
///
/// The arrival time bounds how long the record may sit unattended: the
/// node sweeps out entries older than `introduction_max_age_ms`, the
/// same window the validator applies to the record's own timestamp.
#[derive(Debug, Clone)]
pub(crate) struct PendingIntroduction {
    pub(crate) intro: Introduction,
    pub(crate) introducer: Pubkey,
    pub(crate) received_at_ms: u64,
}

/// Shared node state; mutated behind its own locks so the invariants
/// hold across the accept loop, session tasks, and application calls.
pub(crate) struct NodeState {
    pub(crate) signing_key: SigningKey,
    pub(crate) pubkey: Pubkey,
    pub(crate) pubkey_hex: String,
    pub(crate) topic: [u8; 32],
    pub(crate) config: NodeConfig,
    pub(crate) whitelist: Mutex<HashSet<Pubkey>>,
    pub(crate) auto_accept_from: Mutex<HashSet<Pubkey>>,
    pub(crate) require_approval_for: HashSet<String>,
    pub(crate) sessions: SessionTable,
    pub(crate) pending_intros: Mutex<HashMap<Pubkey, PendingIntroduction>>,
    /// Trust paths recorded at acceptance time, keyed by introduced key.
    /// Consulted by cascade revocation and introduction forwarding.
    pub(crate) accepted_paths: Mutex<HashMap<Pubkey, Vec<String>>>,
    pub(crate) registry: MethodRegistry,
    pub(crate) events: broadcast::Sender<NodeEvent>,
    pub(crate) swarm: Arc<dyn Swarm>,
    pub(crate) shutdown: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NodeState {
    pub(crate) fn emit(&self, event: NodeEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn is_whitelisted(&self, pubkey: &Pubkey) -> bool {
        lock(&self.whitelist).contains(pubkey)
    }

    fn is_auto_accept(&self, pubkey: &Pubkey) -> bool {
        lock(&self.auto_accept_from).contains(pubkey)
    }
}

/// A running ARONIA node joined to one topic.
///
/// Cheap to clone via its inner `Arc`; all methods take `&self`.
pub struct Node {
    state: Arc<NodeState>,
}

impl Node {
    /// Starts a node: joins the swarm topic as announcer and searcher and
    /// begins admitting whitelisted streams.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] if the configuration fails
    /// validation, or [`NodeError::Swarm`] if the topic cannot be joined.
    pub fn start(
        signing_key: SigningKey,
        topic_name: &str,
        config: NodeConfig,
        swarm: Arc<dyn Swarm>,
    ) -> Result<Self, NodeError> {
        config.validate().map_err(NodeError::Config)?;

        let pubkey = signing_key.verifying_key().to_bytes();
        let topic = crypto::topic_hash(topic_name);

        let mut whitelist = HashSet::new();
        for entry in &config.whitelist {
            whitelist.insert(
                hexkey::decode_pubkey(entry).map_err(|e| NodeError::Config(e.to_string()))?,
            );
        }
        let mut auto_accept_from = HashSet::new();
        for entry in &config.trust.auto_accept_from {
            auto_accept_from.insert(
                hexkey::decode_pubkey(entry).map_err(|e| NodeError::Config(e.to_string()))?,
            );
        }
        let require_approval_for: HashSet<String> =
            config.trust.require_approval_for.iter().cloned().collect();

        let conn_rx = swarm
            .join(topic, true, true)
            .map_err(|e| NodeError::Swarm(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let state = Arc::new(NodeState {
            signing_key,
            pubkey,
            pubkey_hex: hexkey::encode(&pubkey),
            topic,
            config,
            whitelist: Mutex::new(whitelist),
            auto_accept_from: Mutex::new(auto_accept_from),
            require_approval_for,
            sessions: SessionTable::new(),
            pending_intros: Mutex::new(HashMap::new()),
            accepted_paths: Mutex::new(HashMap::new()),
            registry: MethodRegistry::new(),
            events,
            swarm,
            shutdown,
        });

        tokio::spawn(accept_loop(state.clone(), conn_rx, shutdown_rx));
        tracing::info!(
            pubkey = %state.pubkey_hex,
            topic = %hexkey::encode(&topic),
            "node joined topic"
        );

        Ok(Self { state })
    }

    /// This node's public key.
    #[must_use]
    pub fn pubkey(&self) -> Pubkey {
        self.state.pubkey
    }

    /// This node's public key in hex form.
    #[must_use]
    pub fn pubkey_hex(&self) -> String {
        self.state.pubkey_hex.clone()
    }

    /// The 32-byte topic hash this node announced under.
    #[must_use]
    pub fn topic(&self) -> [u8; 32] {
        self.state.topic
    }

    /// Subscribes to node events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.state.events.subscribe()
    }

    /// Snapshots of all active peer sessions.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.state
            .sessions
            .handles()
            .iter()
            .map(SessionHandle::snapshot)
            .collect()
    }

    /// Adds a public key to the admission whitelist.
    pub fn allow(&self, pubkey: &Pubkey) {
        lock(&self.state.whitelist).insert(*pubkey);
    }

    /// Registers an RPC method handler, replacing any previous handler
    /// under the same name.
    pub fn register_method<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Value, PeerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        self.state.registry.register(name, handler);
    }

    /// Removes an RPC method handler. Returns `true` if one existed.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.state.registry.unregister(name)
    }

    /// Sends a fire-and-forget event to one peer.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PeerOffline`] if the peer has no active
    /// session, or the write-path error if the send fails.
    pub async fn send(&self, remote: &Pubkey, message: &Value) -> Result<(), NodeError> {
        let handle = self
            .state
            .sessions
            .get(remote)
            .ok_or(NodeError::PeerOffline)?;
        let bytes = payload::encode("event", message)?;
        handle.send_frame(frame_type::EVENT, bytes).await
    }

    /// Invokes a method on a peer and awaits its response.
    ///
    /// Falls back to the configured default deadline when `timeout` is
    /// `None`. Responses arriving after the deadline are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PeerOffline`], [`NodeError::RequestTimeout`],
    /// [`NodeError::Remote`] for handler errors, or a write-path error.
    pub async fn request(
        &self,
        remote: &Pubkey,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, NodeError> {
        let handle = self
            .state
            .sessions
            .get(remote)
            .ok_or(NodeError::PeerOffline)?;
        let timeout_ms = timeout.map_or(self.state.config.default_request_timeout_ms, |d| {
            u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
        });
        handle.request(method, params, timeout_ms).await
    }

    /// Sends an event to every active peer, best effort.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message itself cannot be encoded;
    /// per-peer failures are counted in the outcome instead.
    pub async fn broadcast(&self, message: &Value) -> Result<BroadcastOutcome, NodeError> {
        let bytes = payload::encode("event", message)?;
        let mut outcome = BroadcastOutcome::default();
        for handle in self.state.sessions.handles() {
            match handle.send_frame(frame_type::EVENT, bytes.clone()).await {
                Ok(()) => outcome.sent += 1,
                Err(_) => outcome.offline += 1,
            }
        }
        Ok(outcome)
    }

    /// Introduces `target` to the connected peer `via`, vouching for it
    /// with a signed record.
    ///
    /// When `target` was itself learned through an accepted introduction,
    /// the recorded chain is extended with this node's key and the record
    /// re-signed, so the receiver can still bound delegation depth.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PeerOffline`] if `via` has no active session,
    /// or a write-path error.
    pub async fn introduce(
        &self,
        via: &Pubkey,
        target: &Pubkey,
        alias: &str,
        capabilities: Capabilities,
        message: Option<String>,
    ) -> Result<(), NodeError> {
        let handle = self
            .state
            .sessions
            .get(via)
            .ok_or(NodeError::PeerOffline)?;
        let now = crypto::unix_now_ms()?;

        let trust_path = {
            let paths = lock(&self.state.accepted_paths);
            match paths.get(target) {
                Some(chain) => {
                    let mut extended = chain.clone();
                    extended.push(self.state.pubkey_hex.clone());
                    extended
                }
                None => vec![self.state.pubkey_hex.clone()],
            }
        };

        let intro = Introduction::build_signed(
            &self.state.signing_key,
            target,
            alias,
            capabilities,
            message,
            trust_path,
            now,
        );
        let bytes = payload::encode("introduce", &intro)?;
        handle.send_frame(frame_type::INTRODUCE, bytes).await
    }

    /// Validated introductions awaiting an operator decision.
    #[must_use]
    pub fn pending_introductions(&self) -> Vec<Introduction> {
        lock(&self.state.pending_intros)
            .values()
            .map(|p| p.intro.clone())
            .collect()
    }

    /// Accepts a pending introduction: whitelists the introduced key and
    /// attempts accelerated contact through the swarm.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::UnknownIntroduction`] if nothing is pending
    /// for that key.
    pub fn accept_introduction(&self, pubkey: &Pubkey) -> Result<(), NodeError> {
        let pending = lock(&self.state.pending_intros).get(pubkey).cloned();
        let Some(pending) = pending else {
            return Err(NodeError::UnknownIntroduction);
        };

        // The record may have gone stale between arrival and the
        // operator's decision; the sweep runs on a coarser clock.
        let now = crypto::unix_now_ms()?;
        let age_ms = now.saturating_sub(pending.received_at_ms);
        let max_age_ms = self.state.config.introduction_max_age_ms;
        if age_ms > max_age_ms {
            lock(&self.state.pending_intros).remove(pubkey);
            counters::introductions_total("expired");
            self.state.emit(NodeEvent::IntroductionRejected {
                pubkey: pending.intro.pubkey.clone(),
                reason: "pending introduction expired".into(),
            });
            return Err(NodeError::Introduction(IntroductionError::Expired {
                age_ms,
                max_age_ms,
            }));
        }

        counters::introductions_total("accepted");
        accept_record(&self.state, pending.intro, *pubkey, pending.introducer);
        Ok(())
    }

    /// Rejects a pending introduction.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::UnknownIntroduction`] if nothing is pending
    /// for that key.
    pub fn reject_introduction(&self, pubkey: &Pubkey) -> Result<(), NodeError> {
        let removed = lock(&self.state.pending_intros).remove(pubkey);
        let Some(pending) = removed else {
            return Err(NodeError::UnknownIntroduction);
        };
        counters::introductions_total("rejected");
        self.state.emit(NodeEvent::IntroductionRejected {
            pubkey: pending.intro.pubkey.clone(),
            reason: "rejected by operator".into(),
        });
        Ok(())
    }

    /// Adds or removes a peer from the auto-accept set.
    pub fn set_trust(&self, pubkey: &Pubkey, trusted: bool) {
        let mut auto = lock(&self.state.auto_accept_from);
        if trusted {
            auto.insert(*pubkey);
        } else {
            auto.remove(pubkey);
        }
    }

    /// Removes a peer from both the auto-accept set and the whitelist and
    /// tears down its session. With `cascade`, every peer whose recorded
    /// trust path contains the revoked key is removed the same way.
    pub async fn revoke_trust(&self, pubkey: &Pubkey, cascade: bool) {
        let state = &self.state;
        lock(&state.auto_accept_from).remove(pubkey);
        lock(&state.whitelist).remove(pubkey);
        lock(&state.accepted_paths).remove(pubkey);
        lock(&state.pending_intros).remove(pubkey);
        if let Some(handle) = state.sessions.get(pubkey) {
            handle.destroy().await;
        }

        if cascade {
            let revoked_hex = hexkey::encode(pubkey);
            let victims: Vec<Pubkey> = lock(&state.accepted_paths)
                .iter()
                .filter(|(_, path)| path.contains(&revoked_hex))
                .map(|(key, _)| *key)
                .collect();
            for victim in victims {
                tracing::info!(
                    revoked = %revoked_hex,
                    peer = %hexkey::encode(&victim),
                    "cascading trust revocation"
                );
                lock(&state.whitelist).remove(&victim);
                lock(&state.auto_accept_from).remove(&victim);
                lock(&state.accepted_paths).remove(&victim);
                lock(&state.pending_intros).remove(&victim);
                if let Some(handle) = state.sessions.get(&victim) {
                    handle.destroy().await;
                }
            }
        }
    }

    /// Stops the node: destroys all sessions, clears pending
    /// introductions, and leaves the swarm topic. Idempotent.
    pub async fn stop(&self) {
        if self.state.shutdown.send_replace(true) {
            return;
        }
        for handle in self.state.sessions.drain() {
            handle.destroy().await;
        }
        lock(&self.state.pending_intros).clear();
        self.state.swarm.leave(self.state.topic);
        tracing::info!(pubkey = %self.state.pubkey_hex, "node stopped");
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

async fn accept_loop(
    state: Arc<NodeState>,
    mut conn_rx: mpsc::Receiver<SwarmStream>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let sweep_every = Duration::from_millis(
        (state.config.introduction_max_age_ms / 10).clamp(1_000, 60_000),
    );
    let mut sweep = interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_stream = conn_rx.recv() => match maybe_stream {
                Some(stream) => admit(&state, stream),
                None => break,
            },
            _ = sweep.tick() => prune_expired_introductions(&state),
            _ = shutdown_rx.changed() => break,
        }
    }
    tracing::debug!("accept loop stopped");
}

/// Drops pending introductions that outlived the acceptance window
/// without an operator decision.
fn prune_expired_introductions(state: &NodeState) {
    let Ok(now) = crypto::unix_now_ms() else {
        return;
    };
    let max_age_ms = state.config.introduction_max_age_ms;
    let expired: Vec<PendingIntroduction> = {
        let mut pending = lock(&state.pending_intros);
        let stale: Vec<Pubkey> = pending
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.received_at_ms) > max_age_ms)
            .map(|(key, _)| *key)
            .collect();
        stale.iter().filter_map(|key| pending.remove(key)).collect()
    };
    for entry in expired {
        counters::introductions_total("expired");
        tracing::debug!(peer = %entry.intro.pubkey, "pending introduction expired unattended");
        state.emit(NodeEvent::IntroductionRejected {
            pubkey: entry.intro.pubkey.clone(),
            reason: "pending introduction expired".into(),
        });
    }
}

/// Admission decision for a newly handshaked stream.
pub(crate) fn admit(state: &Arc<NodeState>, stream: SwarmStream) {
    let remote = stream.remote_static_key;

    if *state.shutdown.borrow() {
        return;
    }

    if !state.is_whitelisted(&remote) {
        counters::admissions_total("rejected");
        tracing::debug!(peer = %hexkey::encode(&remote), "rejecting non-whitelisted stream");
        state.emit(NodeEvent::PeerRejected {
            pubkey: remote,
            reason: "not whitelisted".into(),
        });
        return;
    }

    if state.sessions.get(&remote).is_some() {
        counters::admissions_total("duplicate");
        tracing::debug!(
            peer = %hexkey::encode(&remote),
            "duplicate stream for active session, keeping the existing one"
        );
        return;
    }

    let Ok(now) = crypto::unix_now_ms() else {
        return;
    };
    let (handle, cmd_rx) = SessionHandle::new(remote, now);
    if !state.sessions.insert_if_absent(handle.clone()) {
        counters::admissions_total("duplicate");
        return;
    }

    counters::admissions_total("admitted");
    state.emit(NodeEvent::PeerConnected(handle.snapshot()));
    tracing::info!(peer = %hexkey::encode(&remote), "peer connected");
    tokio::spawn(session::run(state.clone(), stream, handle, cmd_rx));
}

/// Handles an inbound INTRODUCE payload delivered by the session for
/// `from`.
pub(crate) fn handle_introduce(state: &Arc<NodeState>, from: &Pubkey, payload_bytes: &[u8]) {
    let intro: Introduction = match payload::decode("introduce", payload_bytes) {
        Ok(intro) => intro,
        Err(e) => {
            counters::introductions_total("malformed");
            state.emit(NodeEvent::ProtocolError {
                pubkey: *from,
                detail: e.to_string(),
            });
            return;
        }
    };

    let Ok(now) = crypto::unix_now_ms() else {
        return;
    };
    let limits = ValidationLimits {
        max_age_ms: state.config.introduction_max_age_ms,
        max_trust_depth: state.config.max_trust_depth,
    };
    if let Err(e) = intro.validate(from, &state.pubkey, limits, now) {
        counters::introductions_total("invalid");
        tracing::debug!(
            introducer = %hexkey::encode(from),
            error = %e,
            "rejecting invalid introduction"
        );
        state.emit(NodeEvent::IntroductionRejected {
            pubkey: intro.pubkey.clone(),
            reason: e.to_string(),
        });
        return;
    }

    let introduced = match intro.introduced_pubkey() {
        Ok(pubkey) => pubkey,
        Err(e) => {
            counters::introductions_total("invalid");
            state.emit(NodeEvent::IntroductionRejected {
                pubkey: intro.pubkey.clone(),
                reason: e.to_string(),
            });
            return;
        }
    };

    if state.is_whitelisted(&introduced) {
        tracing::debug!(
            peer = %intro.pubkey,
            "introduced pubkey already whitelisted, dropping"
        );
        return;
    }

    let needs_approval = intro
        .capabilities
        .accepts
        .iter()
        .any(|token| state.require_approval_for.contains(token));
    if state.is_auto_accept(from) && !needs_approval {
        counters::introductions_total("auto_accepted");
        accept_record(state, intro, introduced, *from);
    } else {
        counters::introductions_total("received");
        lock(&state.pending_intros).insert(
            introduced,
            PendingIntroduction {
                intro: intro.clone(),
                introducer: *from,
                received_at_ms: now,
            },
        );
        state.emit(NodeEvent::IntroductionReceived(intro));
    }
}

/// The accept procedure shared by auto-accept and manual acceptance.
fn accept_record(
    state: &Arc<NodeState>,
    intro: Introduction,
    introduced: Pubkey,
    introducer: Pubkey,
) {
    lock(&state.whitelist).insert(introduced);
    lock(&state.accepted_paths).insert(introduced, intro.trust_path.clone());
    lock(&state.pending_intros).remove(&introduced);
    state.emit(NodeEvent::IntroductionAccepted {
        pubkey: introduced,
        introducer,
    });
    tracing::info!(
        peer = %intro.pubkey,
        introducer = %hexkey::encode(&introducer),
        "introduction accepted"
    );

    // Accelerated contact is best effort; the peer will otherwise admit
    // normally whenever the swarm connects us.
    match state.swarm.open(state.topic, introduced) {
        Ok(Some(stream)) => admit(state, stream),
        Ok(None) => state.emit(NodeEvent::PeerPending { pubkey: introduced }),
        Err(e) => {
            tracing::warn!(error = %e, "swarm contact failed after acceptance");
            state.emit(NodeEvent::PeerPending { pubkey: introduced });
        }
    }
}

/// Drops pending introductions vouched for by a departed introducer.
pub(crate) fn drop_pending_introductions_from(state: &NodeState, introducer: &Pubkey) {
    lock(&state.pending_intros).retain(|_, pending| pending.introducer != *introducer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::MemorySwarm;

    fn start_node(swarm: &MemorySwarm, config: NodeConfig) -> Node {
        let key = crypto::generate_keypair();
        let endpoint = swarm.endpoint(key.verifying_key().to_bytes());
        Node::start(key, "unit-topic", config, endpoint).unwrap()
    }

    fn stub_pending(introduced: Pubkey, received_at_ms: u64) -> PendingIntroduction {
        PendingIntroduction {
            intro: Introduction::build_signed(
                &crypto::generate_keypair(),
                &introduced,
                "stub",
                Capabilities::own(vec![]),
                None,
                vec![],
                received_at_ms,
            ),
            introducer: [4u8; 32],
            received_at_ms,
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_start() {
        let swarm = MemorySwarm::new();
        let key = crypto::generate_keypair();
        let endpoint = swarm.endpoint(key.verifying_key().to_bytes());
        let mut config = NodeConfig::default();
        config.heartbeat_interval_ms = 0;
        assert!(matches!(
            Node::start(key, "unit-topic", config, endpoint),
            Err(NodeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn set_trust_toggles_auto_accept() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        let peer = [7u8; 32];

        node.set_trust(&peer, true);
        assert!(node.state.is_auto_accept(&peer));
        node.set_trust(&peer, false);
        assert!(!node.state.is_auto_accept(&peer));
        node.stop().await;
    }

    #[tokio::test]
    async fn revoke_trust_clears_all_records() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        let peer = [7u8; 32];

        node.allow(&peer);
        node.set_trust(&peer, true);
        lock(&node.state.accepted_paths).insert(peer, vec!["aa".into()]);

        node.revoke_trust(&peer, false).await;
        assert!(!node.state.is_whitelisted(&peer));
        assert!(!node.state.is_auto_accept(&peer));
        assert!(lock(&node.state.accepted_paths).get(&peer).is_none());
        node.stop().await;
    }

    #[tokio::test]
    async fn cascade_revocation_removes_downstream_peers() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        let revoked = [7u8; 32];
        let downstream = [8u8; 32];
        let unrelated = [9u8; 32];

        node.allow(&revoked);
        node.allow(&downstream);
        node.allow(&unrelated);
        lock(&node.state.accepted_paths)
            .insert(downstream, vec![hexkey::encode(&revoked)]);
        lock(&node.state.accepted_paths)
            .insert(unrelated, vec![hexkey::encode(&[1u8; 32])]);

        node.revoke_trust(&revoked, true).await;
        assert!(!node.state.is_whitelisted(&downstream));
        assert!(node.state.is_whitelisted(&unrelated));
        node.stop().await;
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_peer_offline() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        let err = node
            .send(&[5u8; 32], &serde_json::json!({"hi": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::PeerOffline));
        node.stop().await;
    }

    #[tokio::test]
    async fn accept_unknown_introduction_errors() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        assert!(matches!(
            node.accept_introduction(&[5u8; 32]),
            Err(NodeError::UnknownIntroduction)
        ));
        assert!(matches!(
            node.reject_introduction(&[5u8; 32]),
            Err(NodeError::UnknownIntroduction)
        ));
        node.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_clears_state() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        let now = crypto::unix_now_ms().unwrap();
        lock(&node.state.pending_intros).insert([3u8; 32], stub_pending([3u8; 32], now));

        node.stop().await;
        assert!(node.state.sessions.is_empty());
        assert!(lock(&node.state.pending_intros).is_empty());
        node.stop().await;
    }

    #[tokio::test]
    async fn stale_pending_introduction_cannot_be_accepted() {
        let swarm = MemorySwarm::new();
        let node = start_node(&swarm, NodeConfig::default());
        let introduced = [3u8; 32];
        let now = crypto::unix_now_ms().unwrap();
        let stale_since = now - node.state.config.introduction_max_age_ms - 1_000;
        lock(&node.state.pending_intros).insert(introduced, stub_pending(introduced, stale_since));

        let err = node.accept_introduction(&introduced).unwrap_err();
        assert!(matches!(
            err,
            NodeError::Introduction(IntroductionError::Expired { .. })
        ));
        assert!(lock(&node.state.pending_intros).is_empty());
        node.stop().await;
    }

    #[tokio::test]
    async fn sweeper_expires_unattended_pending_introductions() {
        let swarm = MemorySwarm::new();
        let mut config = NodeConfig::default();
        // A short window puts the sweep on its 1 s floor.
        config.introduction_max_age_ms = 500;
        let node = start_node(&swarm, config);
        let mut events = node.subscribe();
        let now = crypto::unix_now_ms().unwrap();
        lock(&node.state.pending_intros)
            .insert([3u8; 32], stub_pending([3u8; 32], now.saturating_sub(10_000)));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(NodeEvent::IntroductionRejected { reason, .. })) => {
                    assert!(reason.contains("expired"));
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => panic!("event channel error: {e}"),
                Err(_) => panic!("timeout waiting for expiry event"),
            }
        }
        assert!(lock(&node.state.pending_intros).is_empty());
        node.stop().await;
    }
}
