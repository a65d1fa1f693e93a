//! Peer session actor: one task per admitted stream.
//!
//! The task owns the stream halves, the pending-request map, the
//! heartbeat timer, and the liveness deadline. Everything else talks to
//! it through [`SessionCommand`]s, so per-session state is only ever
//! touched from one task. Outbound writes go through the task in FIFO
//! order; a write that cannot complete within the backpressure timeout
//! fails its originating operation without tearing the session down.

use crate::error::NodeError;
use crate::events::{NodeEvent, PeerInfo};
use crate::metrics::{counters, gauges};
use crate::node::{self, NodeState};
use crate::registry::PeerContext;
use crate::swarm::SwarmStream;
use aronia_core::frame::Frame;
use aronia_core::payload::{
    self, Capabilities, ControlPayload, RequestPayload, ResponseError, ResponsePayload,
};
use aronia_core::types::frame_type;
use aronia_core::{crypto, hexkey, Pubkey};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, timeout, Duration, Instant, MissedTickBehavior};

/// Commands accepted by a session task.
pub(crate) enum SessionCommand {
    /// Sign and write one frame; `done` reports the write outcome.
    Send {
        frame_type: u8,
        payload: Vec<u8>,
        done: Option<oneshot::Sender<Result<(), NodeError>>>,
    },
    /// Register a pending request, then sign and write its REQUEST frame.
    Request {
        id: String,
        method: String,
        params: Value,
        timeout_ms: u64,
        reply: oneshot::Sender<Result<Value, NodeError>>,
    },
    /// Drop a pending request whose caller gave up on it.
    CancelRequest { id: String },
    /// Tear the session down.
    Destroy,
}

/// Cheap clonable handle to a running session task.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub(crate) remote: Pubkey,
    pub(crate) connected_at_ms: u64,
    pub(crate) cmd_tx: mpsc::Sender<SessionCommand>,
    pub(crate) next_request: Arc<AtomicU64>,
    pub(crate) info: Arc<RwLock<PeerInfo>>,
}

impl SessionHandle {
    pub(crate) fn new(
        remote: Pubkey,
        connected_at_ms: u64,
    ) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let handle = Self {
            remote,
            connected_at_ms,
            cmd_tx,
            next_request: Arc::new(AtomicU64::new(0)),
            info: Arc::new(RwLock::new(PeerInfo {
                pubkey: remote,
                capabilities: None,
                connected_at_ms,
                last_seen_ms: connected_at_ms,
                online: true,
            })),
        };
        (handle, cmd_rx)
    }

    pub(crate) fn snapshot(&self) -> PeerInfo {
        self.info
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Sign and send one frame through the session's write path.
    pub(crate) async fn send_frame(&self, frame_type: u8, payload: Vec<u8>) -> Result<(), NodeError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Send {
                frame_type,
                payload,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| NodeError::PeerOffline)?;
        done_rx.await.map_err(|_| NodeError::PeerOffline)?
    }

    /// Issue a request and await its response, the deadline, or session
    /// teardown, whichever comes first.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Value,
        timeout_ms: u64,
    ) -> Result<Value, NodeError> {
        // Ids are scoped by the session's admit time so they cannot
        // collide across reconnections of the same peer.
        let seq = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{}-{}", self.connected_at_ms, seq);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Request {
                id: id.clone(),
                method: method.to_string(),
                params,
                timeout_ms,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NodeError::PeerOffline)?;

        match timeout(Duration::from_millis(timeout_ms), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                counters::requests_total("offline");
                Err(NodeError::PeerOffline)
            }
            Err(_) => {
                // A full command queue must not lose the cancellation, or
                // the timed-out id would linger in the pending map; hand
                // it to an awaited send instead. A closed channel means
                // teardown, which clears the map itself.
                match self.cmd_tx.try_send(SessionCommand::CancelRequest { id }) {
                    Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                    Err(mpsc::error::TrySendError::Full(cancel)) => {
                        let cmd_tx = self.cmd_tx.clone();
                        tokio::spawn(async move {
                            let _ = cmd_tx.send(cancel).await;
                        });
                    }
                }
                counters::requests_total("timeout");
                Err(NodeError::RequestTimeout)
            }
        }
    }

    pub(crate) async fn destroy(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Destroy).await;
    }
}

type PendingRequests = HashMap<String, oneshot::Sender<Result<Value, NodeError>>>;

/// Drives one admitted session until teardown.
pub(crate) async fn run(
    state: Arc<NodeState>,
    stream: SwarmStream,
    handle: SessionHandle,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    let SwarmStream {
        remote_static_key: remote,
        outbound,
        mut inbound,
    } = stream;

    let hb_interval = Duration::from_millis(state.config.heartbeat_interval_ms);
    let hb_timeout = Duration::from_millis(state.config.heartbeat_timeout_ms);
    let backpressure = Duration::from_millis(state.config.backpressure_timeout_ms);

    let mut pending: PendingRequests = HashMap::new();

    gauges::inc_sessions_active();

    // The capability announcement opens the session.
    let caps = ControlPayload::Capabilities {
        data: Capabilities::own(state.config.accepts.clone()),
    };
    let opened = match payload::encode("control", &caps) {
        Ok(bytes) => write_frame(&state, &outbound, frame_type::CONTROL, bytes, backpressure).await,
        Err(e) => Err(e.into()),
    };

    match opened {
        Err(e) => {
            tracing::debug!(
                peer = %hexkey::encode(&remote),
                error = %e,
                "failed to announce capabilities, closing session"
            );
        }
        Ok(()) => {
            let mut heartbeat = interval(hb_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let liveness = sleep_until(Instant::now() + hb_timeout);
            tokio::pin!(liveness);

            loop {
                tokio::select! {
                    maybe_frame = inbound.recv() => match maybe_frame {
                        Some(bytes) => {
                            if handle_inbound(&state, &remote, &handle, &mut pending, &bytes) {
                                liveness.as_mut().reset(Instant::now() + hb_timeout);
                            }
                        }
                        None => {
                            tracing::debug!(peer = %hexkey::encode(&remote), "stream closed by remote");
                            break;
                        }
                    },
                    cmd = cmd_rx.recv() => match cmd {
                        Some(SessionCommand::Send { frame_type: ft, payload, done }) => {
                            let result = write_frame(&state, &outbound, ft, payload, backpressure).await;
                            if let Some(done) = done {
                                let _ = done.send(result);
                            }
                        }
                        Some(SessionCommand::Request { id, method, params, timeout_ms, reply }) => {
                            pending.insert(id.clone(), reply);
                            let request = RequestPayload {
                                id: id.clone(),
                                method,
                                params,
                                timeout: timeout_ms,
                            };
                            let result = match payload::encode("request", &request) {
                                Ok(bytes) => {
                                    write_frame(&state, &outbound, frame_type::REQUEST, bytes, backpressure).await
                                }
                                Err(e) => Err(e.into()),
                            };
                            if let Err(e) = result {
                                if let Some(reply) = pending.remove(&id) {
                                    let _ = reply.send(Err(e));
                                }
                            }
                        }
                        Some(SessionCommand::CancelRequest { id }) => {
                            pending.remove(&id);
                        }
                        Some(SessionCommand::Destroy) | None => break,
                    },
                    _ = heartbeat.tick() => {
                        send_heartbeat(&state, &outbound);
                    }
                    _ = &mut liveness => {
                        tracing::debug!(
                            peer = %hexkey::encode(&remote),
                            timeout_ms = state.config.heartbeat_timeout_ms,
                            "liveness timeout, tearing down session"
                        );
                        break;
                    }
                }
            }
        }
    }

    teardown(&state, &handle, &mut pending);
}

/// Signs and writes one frame. A transport that reports "not writable"
/// parks the write until it drains or the backpressure deadline passes.
async fn write_frame(
    state: &NodeState,
    outbound: &mpsc::Sender<Vec<u8>>,
    frame_type: u8,
    payload_bytes: Vec<u8>,
    backpressure: Duration,
) -> Result<(), NodeError> {
    let now = crypto::unix_now_ms()?;
    let frame = Frame::build_signed(&state.signing_key, frame_type, 0, now, payload_bytes);
    let bytes = frame.serialize();
    match outbound.try_send(bytes) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(NodeError::PeerOffline),
        Err(mpsc::error::TrySendError::Full(bytes)) => {
            match timeout(backpressure, outbound.send(bytes)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(NodeError::PeerOffline),
                Err(_) => {
                    counters::frames_dropped_total("backpressure");
                    Err(NodeError::Backpressure)
                }
            }
        }
    }
}

/// Best-effort heartbeat; failures are left to the liveness timer.
fn send_heartbeat(state: &NodeState, outbound: &mpsc::Sender<Vec<u8>>) {
    let Ok(now) = crypto::unix_now_ms() else {
        return;
    };
    let Ok(bytes) = payload::encode("control", &ControlPayload::Heartbeat) else {
        return;
    };
    let frame = Frame::build_signed(&state.signing_key, frame_type::CONTROL, 0, now, bytes);
    if outbound.try_send(frame.serialize()).is_err() {
        tracing::debug!("heartbeat skipped: transport not writable");
    }
}

/// Parses, verifies, and dispatches one inbound frame. Returns `true`
/// when the frame was authentic (which re-arms the liveness deadline);
/// malformed or misaddressed frames are dropped without affecting the
/// session.
fn handle_inbound(
    state: &Arc<NodeState>,
    remote: &Pubkey,
    handle: &SessionHandle,
    pending: &mut PendingRequests,
    bytes: &[u8],
) -> bool {
    let frame = match Frame::parse(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            counters::frames_dropped_total("malformed");
            state.emit(NodeEvent::ProtocolError {
                pubkey: *remote,
                detail: e.to_string(),
            });
            return false;
        }
    };

    if !frame.verify() {
        counters::frames_dropped_total("bad_signature");
        state.emit(NodeEvent::ProtocolError {
            pubkey: *remote,
            detail: "frame signature verification failed".into(),
        });
        return false;
    }

    if frame.sender != *remote {
        counters::frames_dropped_total("sender_mismatch");
        state.emit(NodeEvent::ProtocolError {
            pubkey: *remote,
            detail: "frame sender does not match session identity".into(),
        });
        return false;
    }

    if let Ok(now) = crypto::unix_now_ms() {
        if let Ok(mut info) = handle.info.write() {
            info.last_seen_ms = now;
        }
    }

    match frame.frame_type {
        frame_type::CONTROL => {
            counters::frames_rx_total("control");
            handle_control(state, remote, handle, &frame.payload);
        }
        frame_type::REQUEST => {
            counters::frames_rx_total("request");
            handle_request(state, remote, handle, &frame.payload);
        }
        frame_type::RESPONSE => {
            counters::frames_rx_total("response");
            handle_response(state, remote, pending, &frame.payload);
        }
        frame_type::EVENT => {
            counters::frames_rx_total("event");
            match serde_json::from_slice::<Value>(&frame.payload) {
                Ok(value) => state.emit(NodeEvent::PeerMessage {
                    from: *remote,
                    payload: value,
                    received_at: chrono::Utc::now(),
                }),
                Err(e) => state.emit(NodeEvent::ProtocolError {
                    pubkey: *remote,
                    detail: format!("malformed event payload: {e}"),
                }),
            }
        }
        frame_type::INTRODUCE => {
            counters::frames_rx_total("introduce");
            node::handle_introduce(state, remote, &frame.payload);
        }
        frame_type::STREAM_DATA => {
            counters::frames_rx_total("stream");
            state.emit(NodeEvent::StreamData {
                from: *remote,
                data: frame.payload,
                end: false,
            });
        }
        frame_type::STREAM_END => {
            counters::frames_rx_total("stream");
            state.emit(NodeEvent::StreamData {
                from: *remote,
                data: frame.payload,
                end: true,
            });
        }
        unknown => {
            counters::frames_dropped_total("unknown_type");
            state.emit(NodeEvent::ProtocolError {
                pubkey: *remote,
                detail: format!("unknown frame type 0x{unknown:02x}"),
            });
        }
    }

    true
}

fn handle_control(state: &NodeState, remote: &Pubkey, handle: &SessionHandle, payload_bytes: &[u8]) {
    match payload::decode::<ControlPayload>("control", payload_bytes) {
        Ok(ControlPayload::Heartbeat) => {
            // Resetting the liveness deadline already happened upstream.
        }
        Ok(ControlPayload::Capabilities { data }) => {
            if let Ok(mut info) = handle.info.write() {
                info.capabilities = Some(data.clone());
            }
            state.emit(NodeEvent::PeerCapabilities {
                pubkey: *remote,
                capabilities: data,
            });
        }
        Err(e) => {
            state.emit(NodeEvent::ProtocolError {
                pubkey: *remote,
                detail: e.to_string(),
            });
        }
    }
}

/// Runs the handler off the session task so a slow method cannot stall
/// inbound processing; the RESPONSE is queued back through the write path.
fn handle_request(
    state: &Arc<NodeState>,
    remote: &Pubkey,
    handle: &SessionHandle,
    payload_bytes: &[u8],
) {
    let request: RequestPayload = match payload::decode("request", payload_bytes) {
        Ok(request) => request,
        Err(e) => {
            state.emit(NodeEvent::ProtocolError {
                pubkey: *remote,
                detail: e.to_string(),
            });
            return;
        }
    };

    let state = state.clone();
    let remote = *remote;
    let cmd_tx = handle.cmd_tx.clone();
    tokio::spawn(async move {
        let outcome = state
            .registry
            .dispatch(&request.method, request.params, PeerContext { pubkey: remote })
            .await;
        let response = match outcome {
            Ok(result) => ResponsePayload {
                id: request.id,
                result: Some(result),
                error: None,
            },
            Err(e) => ResponsePayload {
                id: request.id,
                result: None,
                error: Some(ResponseError {
                    code: e.code,
                    message: e.message,
                }),
            },
        };
        let Ok(bytes) = payload::encode("response", &response) else {
            return;
        };
        let _ = cmd_tx
            .send(SessionCommand::Send {
                frame_type: frame_type::RESPONSE,
                payload: bytes,
                done: None,
            })
            .await;
    });
}

fn handle_response(
    state: &NodeState,
    remote: &Pubkey,
    pending: &mut PendingRequests,
    payload_bytes: &[u8],
) {
    let response: ResponsePayload = match payload::decode("response", payload_bytes) {
        Ok(response) => response,
        Err(e) => {
            state.emit(NodeEvent::ProtocolError {
                pubkey: *remote,
                detail: e.to_string(),
            });
            return;
        }
    };

    let Some(reply) = pending.remove(&response.id) else {
        tracing::debug!(id = %response.id, "response for unknown or expired request, dropping");
        return;
    };

    let result = match response.error {
        Some(error) => {
            counters::requests_total("remote_error");
            Err(NodeError::Remote {
                code: error.code,
                message: error.message,
            })
        }
        None => {
            counters::requests_total("ok");
            Ok(response.result.unwrap_or(Value::Null))
        }
    };
    let _ = reply.send(result);
}

fn teardown(state: &Arc<NodeState>, handle: &SessionHandle, pending: &mut PendingRequests) {
    state
        .sessions
        .remove_if(&handle.remote, handle.connected_at_ms);
    if let Ok(mut info) = handle.info.write() {
        info.online = false;
    }
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(NodeError::PeerOffline));
    }
    node::drop_pending_introductions_from(state, &handle.remote);
    gauges::dec_sessions_active();
    state.emit(NodeEvent::PeerDisconnected {
        pubkey: handle.remote,
    });
    tracing::info!(peer = %hexkey::encode(&handle.remote), "peer disconnected");
}
