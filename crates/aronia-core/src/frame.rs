//! ARONIA binary frame serialization, parsing, signing, and verification.
//!
//! Every wire message is a single length-prefixed frame signed by its
//! sender. All multi-byte integers are big-endian. Layout:
//!
//! | Offset | Size | Field |
//! |--------|------|-------------------------------|
//! | 0      | 4    | total frame length (u32)      |
//! | 4      | 1    | protocol version (= 1)        |
//! | 5      | 1    | frame type                    |
//! | 6      | 2    | flags                         |
//! | 8      | 8    | timestamp, ms since epoch     |
//! | 16     | 32   | sender public key             |
//! | 48     | 4    | payload length (u32)          |
//! | 52     | n    | payload (UTF-8 JSON)          |
//! | 52 + n | 64   | Ed25519 signature             |
//!
//! The signature covers every byte before it — length, version, type,
//! flags, timestamp, sender, payload length, and payload — so nothing an
//! attacker could tamper with is left uncovered, and the signed range is
//! a contiguous prefix.

use crate::crypto;
use crate::types::{Pubkey, HEADER_LEN, MAX_PAYLOAD, MIN_FRAME_LEN, PROTOCOL_VERSION, SIGNATURE_LEN};
use ed25519_dalek::SigningKey;
use thiserror::Error;

/// A parsed ARONIA protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version, currently always [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Frame type byte; see [`crate::types::frame_type`].
    pub frame_type: u8,
    /// Flag bits; unknown bits are preserved.
    pub flags: u16,
    /// Sender's clock at build time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Sender's Ed25519 public key.
    pub sender: Pubkey,
    /// Type-dependent payload bytes (UTF-8 JSON for all core types).
    pub payload: Vec<u8>,
    /// Ed25519 signature over the serialized prefix.
    pub signature: [u8; 64],
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The input is shorter than the minimum frame size.
    #[error("frame too short: need at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The declared length field disagrees with the input length.
    #[error("length mismatch: declared {declared}, got {actual} bytes")]
    LengthMismatch {
        /// Length declared in the frame header.
        declared: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The version byte is not a supported protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    /// The declared payload length disagrees with the frame length.
    #[error("payload length mismatch: declared {declared}, derived {derived}")]
    PayloadLengthMismatch {
        /// Payload length declared in the header field.
        declared: usize,
        /// Payload length derived from the total frame length.
        derived: usize,
    },
    /// The frame payload exceeds the maximum allowed size.
    #[error("payload too large: max {max}, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed payload size.
        max: usize,
        /// Actual payload size received.
        actual: usize,
    },
}

impl Frame {
    /// Builds and signs a frame from the given signing key.
    ///
    /// The frame carries the key's public half as `sender`, and its
    /// signature covers the entire serialized prefix.
    #[must_use]
    pub fn build_signed(
        signing_key: &SigningKey,
        frame_type: u8,
        flags: u16,
        timestamp_ms: u64,
        payload: Vec<u8>,
    ) -> Self {
        let mut frame = Self {
            version: PROTOCOL_VERSION,
            frame_type,
            flags,
            timestamp_ms,
            sender: signing_key.verifying_key().to_bytes(),
            payload,
            signature: [0u8; 64],
        };
        frame.signature = crypto::sign_prefix(signing_key, &frame.signed_prefix());
        frame
    }

    /// Total serialized length of this frame in bytes.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + SIGNATURE_LEN
    }

    /// The byte range the signature covers: the full serialization minus
    /// the trailing 64 signature bytes.
    #[must_use]
    fn signed_prefix(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.write_header(&mut v);
        v.extend_from_slice(&self.payload);
        v
    }

    fn write_header(&self, v: &mut Vec<u8>) {
        let total = u32::try_from(self.serialized_len()).unwrap_or(u32::MAX);
        let payload_len = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        v.extend_from_slice(&total.to_be_bytes());
        v.push(self.version);
        v.push(self.frame_type);
        v.extend_from_slice(&self.flags.to_be_bytes());
        v.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        v.extend_from_slice(&self.sender);
        v.extend_from_slice(&payload_len.to_be_bytes());
    }

    /// Serializes this frame into a byte vector for transmission.
    ///
    /// # Examples
    ///
    /// ```
    /// use aronia_core::frame::Frame;
    /// use aronia_core::types::{frame_type, MIN_FRAME_LEN};
    /// use ed25519_dalek::SigningKey;
    ///
    /// let key = SigningKey::from_bytes(&[7u8; 32]);
    /// let frame = Frame::build_signed(&key, frame_type::EVENT, 0, 1_700_000_000_000, vec![]);
    /// assert_eq!(frame.serialize().len(), MIN_FRAME_LEN);
    /// ```
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.serialized_len());
        self.write_header(&mut v);
        v.extend_from_slice(&self.payload);
        v.extend_from_slice(&self.signature);
        v
    }

    /// Parses a byte slice into a typed `Frame`.
    ///
    /// Signature verification is a separate step; see [`Frame::verify`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the input is shorter than
    /// [`MIN_FRAME_LEN`], the declared length disagrees with the input
    /// length, the version is unsupported, or the payload length field is
    /// inconsistent or oversized.
    ///
    /// # Examples
    ///
    /// ```
    /// use aronia_core::frame::Frame;
    /// use aronia_core::types::frame_type;
    /// use ed25519_dalek::SigningKey;
    ///
    /// let key = SigningKey::from_bytes(&[7u8; 32]);
    /// let frame = Frame::build_signed(&key, frame_type::EVENT, 0, 1_700_000_000_000, b"{}".to_vec());
    /// let parsed = Frame::parse(&frame.serialize()).unwrap();
    /// assert_eq!(parsed, frame);
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort {
                expected: MIN_FRAME_LEN,
                actual: data.len(),
            });
        }

        let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if declared != data.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }

        let version = data[4];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let frame_type = data[5];
        let flags = u16::from_be_bytes([data[6], data[7]]);
        let timestamp_ms = u64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        let mut sender: Pubkey = [0u8; 32];
        sender.copy_from_slice(&data[16..48]);

        let payload_declared = u32::from_be_bytes([data[48], data[49], data[50], data[51]]) as usize;
        let payload_derived = data.len() - HEADER_LEN - SIGNATURE_LEN;
        if payload_declared != payload_derived {
            return Err(FrameError::PayloadLengthMismatch {
                declared: payload_declared,
                derived: payload_derived,
            });
        }
        if payload_derived > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD,
                actual: payload_derived,
            });
        }

        let payload = data[HEADER_LEN..HEADER_LEN + payload_derived].to_vec();
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&data[HEADER_LEN + payload_derived..]);

        Ok(Self {
            version,
            frame_type,
            flags,
            timestamp_ms,
            sender,
            payload,
            signature,
        })
    }

    /// Verifies this frame's signature against its `sender` key.
    ///
    /// Returns `false` on any mismatch; never panics.
    ///
    /// # Examples
    ///
    /// ```
    /// use aronia_core::frame::Frame;
    /// use aronia_core::types::frame_type;
    /// use ed25519_dalek::SigningKey;
    ///
    /// let key = SigningKey::from_bytes(&[7u8; 32]);
    /// let frame = Frame::build_signed(&key, frame_type::EVENT, 0, 1_700_000_000_000, b"{}".to_vec());
    /// assert!(frame.verify());
    /// ```
    #[must_use]
    pub fn verify(&self) -> bool {
        crypto::verify_prefix(&self.sender, &self.signed_prefix(), &self.signature)
    }
}
