//! Core type definitions and protocol constants for ARONIA.

/// A 32-byte Ed25519 public key used as a node identity.
pub type Pubkey = [u8; 32];

/// Current wire protocol version. Bump on breaking frame-format changes.
pub const PROTOCOL_VERSION: u8 = 1;

/// Byte length of the fixed frame header (everything before the payload).
pub const HEADER_LEN: usize = 52;

/// Byte length of the trailing Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Minimum length of a valid frame (header + signature, empty payload).
pub const MIN_FRAME_LEN: usize = HEADER_LEN + SIGNATURE_LEN;

/// Maximum payload size in bytes (1 MiB). Bounds allocation when parsing
/// frames from untrusted peers.
pub const MAX_PAYLOAD: usize = 1 << 20;

/// Wire frame types carried in the header's type byte.
pub mod frame_type {
    /// Session control: heartbeats and capability announcements.
    pub const CONTROL: u8 = 0x01;
    /// RPC request expecting a matching RESPONSE.
    pub const REQUEST: u8 = 0x02;
    /// RPC response correlated to a REQUEST by id.
    pub const RESPONSE: u8 = 0x03;
    /// Fire-and-forget application event.
    pub const EVENT: u8 = 0x04;
    /// Reserved streaming data chunk.
    pub const STREAM_DATA: u8 = 0x05;
    /// Reserved streaming terminator.
    pub const STREAM_END: u8 = 0x06;
    /// Trust-delegation record from an already-trusted peer.
    pub const INTRODUCE: u8 = 0x07;
}

/// Flag bits carried in the header's flags field.
///
/// The core sets all of these to zero. Unknown bits are accepted and
/// passed through so future peers can extend the field.
pub mod flags {
    /// Payload is encrypted at the application layer.
    pub const ENCRYPTED: u16 = 0x0001;
    /// Payload is compressed (reserved, unused by the core).
    pub const COMPRESSED: u16 = 0x0002;
    /// Frame should be prioritized by intermediaries.
    pub const URGENT: u16 = 0x0004;
}

/// Default capability identity announced after handshake.
pub mod capability {
    /// Agent implementation name.
    pub const AGENT: &str = "aronia";
    /// Agent implementation version.
    pub const VERSION: &str = "0.1.0";
}
