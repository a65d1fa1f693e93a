//! Signed trust-delegation records ("introductions").
//!
//! An introduction is a record by which one peer (the introducer) vouches
//! for a third-party public key. The introducer signs a canonical JSON
//! serialization of the record body; the receiver verifies the signature
//! against the key of the peer that delivered the record, checks the
//! record's age, and runs cycle/depth checks on the accumulated trust
//! path before admitting the introduced key.

use crate::crypto;
use crate::hexkey;
use crate::payload::Capabilities;
use crate::Pubkey;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum age of an introduction record: 24 hours.
pub const DEFAULT_MAX_AGE_MS: u64 = 86_400_000;

/// Default maximum accepted trust path length.
pub const DEFAULT_MAX_TRUST_DEPTH: usize = 3;

/// A signed introduction record as carried in an INTRODUCE payload.
///
/// Public keys are hex-encoded in this record (the display/config form);
/// comparisons against live sessions decode back to raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Introduction {
    /// Hex-encoded public key of the peer being introduced.
    pub pubkey: String,
    /// Human-readable alias for the introduced peer.
    pub alias: String,
    /// Capabilities the introducer claims for the introduced peer.
    pub capabilities: Capabilities,
    /// Free-form note from the introducer.
    pub message: Option<String>,
    /// Hex-encoded public key of the signing introducer.
    pub introducer_pubkey: String,
    /// Signing time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Ordered chain of introducer pubkeys (hex) accumulated so far.
    pub trust_path: Vec<String>,
    /// Hex-encoded Ed25519 signature over the canonical body.
    pub signature: String,
}

/// The signed body: every field of [`Introduction`] except `signature`,
/// serialized in this fixed order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalBody<'a> {
    pubkey: &'a str,
    alias: &'a str,
    capabilities: &'a Capabilities,
    message: &'a Option<String>,
    introducer_pubkey: &'a str,
    timestamp: u64,
    trust_path: &'a [String],
}

/// Reasons an introduction record fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntroductionError {
    /// The record is older than the configured maximum age.
    #[error("introduction expired: {age_ms} ms old, max {max_age_ms} ms")]
    Expired {
        /// Computed record age in milliseconds.
        age_ms: u64,
        /// Configured maximum age in milliseconds.
        max_age_ms: u64,
    },
    /// The record's timestamp is ahead of the local clock.
    #[error("introduction is from the future")]
    FromTheFuture,
    /// The signature does not verify against the introducer's key.
    #[error("invalid signature on introduction")]
    BadSignature,
    /// The record's introducer is not the peer that delivered it.
    #[error("introducer mismatch: record signed by {declared}, delivered by {delivered}")]
    IntroducerMismatch {
        /// Hex pubkey named in the record.
        declared: String,
        /// Hex pubkey of the delivering session.
        delivered: String,
    },
    /// The trust path contains the validating node or a repeated entry.
    #[error("circular trust path")]
    CircularTrust,
    /// The trust path exceeds the configured depth limit.
    #[error("trust path too long: {len} entries, max {max}")]
    TrustPathTooLong {
        /// Number of entries in the record's trust path.
        len: usize,
        /// Configured maximum depth.
        max: usize,
    },
    /// A hex-encoded key field in the record could not be decoded.
    #[error("malformed key in introduction: {0}")]
    BadKey(String),
}

/// Validation limits, taken from node configuration.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    /// Maximum record age in milliseconds.
    pub max_age_ms: u64,
    /// Maximum trust path length.
    pub max_trust_depth: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_MAX_AGE_MS,
            max_trust_depth: DEFAULT_MAX_TRUST_DEPTH,
        }
    }
}

/// Returns `true` if `trust_path` contains `own_pubkey` or any duplicate
/// entry — either makes the delegation chain cyclic.
///
/// # Examples
///
/// ```
/// use aronia_core::introduction::detect_circular_trust;
///
/// let path = ["b".to_string(), "c".to_string(), "a".to_string()];
/// assert!(detect_circular_trust(&path, "a"));
/// ```
#[must_use]
pub fn detect_circular_trust(trust_path: &[String], own_pubkey: &str) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(trust_path.len());
    for entry in trust_path {
        if entry == own_pubkey || !seen.insert(entry.as_str()) {
            return true;
        }
    }
    false
}

impl Introduction {
    /// Builds and signs an introduction record with `signing_key` as the
    /// introducer.
    ///
    /// `trust_path` is the chain accumulated so far; a first-hand
    /// introduction passes the introducer's own hex key as the only entry.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn build_signed(
        signing_key: &SigningKey,
        target: &Pubkey,
        alias: &str,
        capabilities: Capabilities,
        message: Option<String>,
        trust_path: Vec<String>,
        timestamp_ms: u64,
    ) -> Self {
        let mut intro = Self {
            pubkey: hexkey::encode(target),
            alias: alias.to_string(),
            capabilities,
            message,
            introducer_pubkey: hexkey::encode(&signing_key.verifying_key().to_bytes()),
            timestamp: timestamp_ms,
            trust_path,
            signature: String::new(),
        };
        let sig = crypto::sign_prefix(signing_key, &intro.canonical_bytes());
        intro.signature = hexkey::encode(&sig);
        intro
    }

    /// Deterministic serialization of the record body excluding the
    /// signature — the exact bytes the introducer signed.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let body = CanonicalBody {
            pubkey: &self.pubkey,
            alias: &self.alias,
            capabilities: &self.capabilities,
            message: &self.message,
            introducer_pubkey: &self.introducer_pubkey,
            timestamp: self.timestamp,
            trust_path: &self.trust_path,
        };
        // Struct serialization with a fixed field order cannot fail.
        serde_json::to_vec(&body).unwrap_or_default()
    }

    /// The introduced public key, decoded from its hex form.
    ///
    /// # Errors
    ///
    /// Returns [`IntroductionError::BadKey`] if the field is not a valid
    /// 32-byte hex key.
    pub fn introduced_pubkey(&self) -> Result<Pubkey, IntroductionError> {
        hexkey::decode_pubkey(&self.pubkey).map_err(|e| IntroductionError::BadKey(e.to_string()))
    }

    /// Validates this record against the peer that delivered it.
    ///
    /// Checks run in order: record age, signature over the canonical body,
    /// introducer identity against `delivered_by`, trust-path cycles
    /// against `own_pubkey`, and trust-path depth.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`IntroductionError`].
    pub fn validate(
        &self,
        delivered_by: &Pubkey,
        own_pubkey: &Pubkey,
        limits: ValidationLimits,
        now_ms: u64,
    ) -> Result<(), IntroductionError> {
        if self.timestamp > now_ms {
            return Err(IntroductionError::FromTheFuture);
        }
        let age_ms = now_ms - self.timestamp;
        if age_ms > limits.max_age_ms {
            return Err(IntroductionError::Expired {
                age_ms,
                max_age_ms: limits.max_age_ms,
            });
        }

        let introducer = hexkey::decode_pubkey(&self.introducer_pubkey)
            .map_err(|e| IntroductionError::BadKey(e.to_string()))?;
        let signature: [u8; 64] = hexkey::decode(&self.signature)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or(IntroductionError::BadSignature)?;
        if !crypto::verify_prefix(&introducer, &self.canonical_bytes(), &signature) {
            return Err(IntroductionError::BadSignature);
        }

        if introducer != *delivered_by {
            return Err(IntroductionError::IntroducerMismatch {
                declared: self.introducer_pubkey.clone(),
                delivered: hexkey::encode(delivered_by),
            });
        }

        if detect_circular_trust(&self.trust_path, &hexkey::encode(own_pubkey)) {
            return Err(IntroductionError::CircularTrust);
        }

        if self.trust_path.len() > limits.max_trust_depth {
            return Err(IntroductionError::TrustPathTooLong {
                len: self.trust_path.len(),
                max: limits.max_trust_depth,
            });
        }

        Ok(())
    }
}
