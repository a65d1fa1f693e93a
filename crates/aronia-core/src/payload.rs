//! Typed JSON payload schemas for each frame type.
//!
//! The payload shape is part of each frame type's contract: CONTROL
//! frames carry heartbeats and capability announcements, REQUEST/RESPONSE
//! frames carry the RPC envelope, EVENT frames carry opaque application
//! JSON, and INTRODUCE frames carry an [`crate::introduction::Introduction`]
//! record. JSON keeps the signed byte range deterministic given a fixed
//! serialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error produced when a payload cannot be encoded or decoded as the
/// JSON schema its frame type requires.
#[derive(Debug, Error)]
#[error("malformed {kind} payload: {source}")]
pub struct PayloadError {
    /// Human-readable payload kind ("control", "request", ...).
    pub kind: &'static str,
    /// Underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Self-described peer capabilities, exchanged right after handshake.
///
/// Purely informational: `accepts` lists the capability tokens the peer
/// claims to handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Agent implementation name.
    pub agent: String,
    /// Agent implementation version.
    pub version: String,
    /// Capability tokens this peer accepts.
    #[serde(default)]
    pub accepts: Vec<String>,
}

impl Capabilities {
    /// Capabilities of this implementation with the given accept tokens.
    #[must_use]
    pub fn own(accepts: Vec<String>) -> Self {
        Self {
            agent: crate::types::capability::AGENT.to_string(),
            version: crate::types::capability::VERSION.to_string(),
            accepts,
        }
    }
}

/// CONTROL frame payload: `{"type": "heartbeat" | "capabilities", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlPayload {
    /// Periodic liveness signal; carries no data.
    Heartbeat,
    /// Capability announcement; replaces any previously-known set.
    Capabilities {
        /// The announcing peer's capabilities.
        data: Capabilities,
    },
}

/// REQUEST frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Request id, unique within the sending session.
    pub id: String,
    /// Name of the method to invoke on the remote registry.
    pub method: String,
    /// Method parameters, passed through to the handler.
    pub params: Value,
    /// Caller's deadline in milliseconds, informational for the callee.
    pub timeout: u64,
}

/// Error object carried in a RESPONSE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Machine-readable error code, e.g. `"method-not-found"`.
    pub code: String,
    /// Human-readable error description.
    pub message: String,
}

/// RESPONSE frame payload; exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Id of the request this response answers.
    pub id: String,
    /// Successful result, if the handler completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error, if the handler failed or the method was unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// Error code used when a request names an unregistered method.
pub const METHOD_NOT_FOUND: &str = "method-not-found";

/// Encodes a payload value to its UTF-8 JSON wire form.
///
/// # Errors
///
/// Returns [`PayloadError`] if the value cannot be serialized (only
/// possible for application-supplied values with non-JSON map keys).
pub fn encode<T: Serialize>(kind: &'static str, value: &T) -> Result<Vec<u8>, PayloadError> {
    serde_json::to_vec(value).map_err(|source| PayloadError { kind, source })
}

/// Decodes a payload from its UTF-8 JSON wire form.
///
/// # Errors
///
/// Returns [`PayloadError`] if the bytes are not valid JSON for the
/// expected schema.
pub fn decode<'a, T: Deserialize<'a>>(
    kind: &'static str,
    bytes: &'a [u8],
) -> Result<T, PayloadError> {
    serde_json::from_slice(bytes).map_err(|source| PayloadError { kind, source })
}
