//! Cryptographic utilities for ARONIA identities and signed records.
//!
//! Provides Ed25519 signing and verification over byte prefixes (used by
//! both the frame codec and the introduction validator), millisecond
//! timestamps, keypair generation, and the SHA-256 topic hash under which
//! nodes announce and search on the swarm.

use crate::Pubkey;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;

/// Namespace prefix mixed into every topic hash.
const TOPIC_NAMESPACE: &[u8] = b"aronia";

/// Error returned when the system clock is before the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockError;

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system clock is before Unix epoch")
    }
}

impl std::error::Error for ClockError {}

/// Signs a byte prefix, returning the raw 64-byte signature.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
/// use aronia_core::crypto;
///
/// let key = SigningKey::from_bytes(&[1u8; 32]);
/// let sig = crypto::sign_prefix(&key, b"signed bytes");
/// assert_eq!(sig.len(), 64);
/// ```
#[must_use]
pub fn sign_prefix(signing_key: &SigningKey, prefix: &[u8]) -> [u8; 64] {
    use ed25519_dalek::Signer;
    signing_key.sign(prefix).to_bytes()
}

/// Verifies a 64-byte signature over a byte prefix.
///
/// Returns `true` if the Ed25519 signature is valid for the given sender
/// public key, `false` on any mismatch or malformed key.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
/// use aronia_core::crypto;
///
/// let key = SigningKey::from_bytes(&[1u8; 32]);
/// let sig = crypto::sign_prefix(&key, b"signed bytes");
/// let pubkey = key.verifying_key().to_bytes();
/// assert!(crypto::verify_prefix(&pubkey, b"signed bytes", &sig));
/// assert!(!crypto::verify_prefix(&pubkey, b"other bytes", &sig));
/// ```
#[must_use]
pub fn verify_prefix(sender: &Pubkey, prefix: &[u8], signature: &[u8; 64]) -> bool {
    use ed25519_dalek::Verifier;
    let Ok(verifying_key) = VerifyingKey::from_bytes(sender) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    verifying_key.verify(prefix, &sig).is_ok()
}

/// Returns the current Unix timestamp in milliseconds.
///
/// # Errors
///
/// Returns [`ClockError`] if the system clock is before the Unix epoch,
/// indicating a misconfigured system. Callers must handle this case
/// explicitly rather than silently using a fallback value.
///
/// # Examples
///
/// ```
/// let now = aronia_core::crypto::unix_now_ms().unwrap();
/// assert!(now > 1_700_000_000_000);
/// ```
pub fn unix_now_ms() -> Result<u64, ClockError> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|_| ClockError)
}

/// Computes the 32-byte DHT topic hash: `SHA-256("aronia" ‖ topic_name)`.
///
/// # Examples
///
/// ```
/// let a = aronia_core::crypto::topic_hash("agents/general");
/// let b = aronia_core::crypto::topic_hash("agents/general");
/// assert_eq!(a, b);
/// assert_ne!(a, aronia_core::crypto::topic_hash("agents/other"));
/// ```
#[must_use]
pub fn topic_hash(topic_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(TOPIC_NAMESPACE);
    hasher.update(topic_name.as_bytes());
    hasher.finalize().into()
}

/// Generates a fresh Ed25519 keypair using OS randomness.
#[must_use]
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}
