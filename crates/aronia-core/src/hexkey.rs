//! Hex encoding and decoding utilities for ARONIA public keys.
//!
//! Wraps the `hex` crate with convenience functions for encoding and
//! decoding Ed25519 public keys used as node identities. Hex is only the
//! display/config form; keys are compared by their raw bytes everywhere.

use crate::Pubkey;
use thiserror::Error;

/// Errors that can occur when decoding a hex-encoded public key.
///
/// # Examples
///
/// ```
/// use aronia_core::hexkey;
/// // Wrong length returns WrongLength error
/// let short = hexkey::encode(&[1u8; 16]);
/// assert!(hexkey::decode_pubkey(&short).is_err());
/// ```
#[derive(Debug, Error, PartialEq)]
pub enum PubkeyDecodeError {
    /// The input is not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The decoded bytes are not exactly 32 bytes.
    #[error("pubkey must be exactly 32 bytes, got {0}")]
    WrongLength(usize),
}

/// Encodes raw bytes to a lowercase hex string.
///
/// # Examples
///
/// ```
/// assert_eq!(aronia_core::hexkey::encode(&[0xDE, 0xAD]), "dead");
/// ```
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string to raw bytes.
///
/// # Errors
///
/// Returns `FromHexError` if the input is not valid hex.
///
/// # Examples
///
/// ```
/// let decoded = aronia_core::hexkey::decode("dead").unwrap();
/// assert_eq!(decoded, vec![0xDE, 0xAD]);
/// ```
pub fn decode(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s)
}

/// Decodes a hex string to a 32-byte public key array.
///
/// # Errors
///
/// Returns [`PubkeyDecodeError`] if the input is not valid hex or does
/// not decode to exactly 32 bytes.
///
/// # Examples
///
/// ```
/// let pubkey = [0x42u8; 32];
/// let encoded = aronia_core::hexkey::encode(&pubkey);
/// let decoded = aronia_core::hexkey::decode_pubkey(&encoded).unwrap();
/// assert_eq!(decoded, pubkey);
/// ```
pub fn decode_pubkey(s: &str) -> Result<Pubkey, PubkeyDecodeError> {
    let bytes = decode(s)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_: Vec<u8>| PubkeyDecodeError::WrongLength(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let pubkey = [0xA7u8; 32];
        assert_eq!(decode_pubkey(&encode(&pubkey)).unwrap(), pubkey);
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let pubkey = [0xABu8; 32];
        let upper = encode(&pubkey).to_uppercase();
        assert_eq!(decode_pubkey(&upper).unwrap(), pubkey);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = decode_pubkey(&encode(&[1u8; 16])).unwrap_err();
        assert_eq!(err, PubkeyDecodeError::WrongLength(16));
    }

    #[test]
    fn non_hex_is_rejected() {
        assert!(matches!(
            decode_pubkey("not hex at all"),
            Err(PubkeyDecodeError::Hex(_))
        ));
    }
}
