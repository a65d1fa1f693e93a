//! Wire protocol primitives shared across the ARONIA fabric.
//!
//! This crate provides:
//! - Signed binary frame serialization and parsing ([`frame`])
//! - Typed JSON payload schemas per frame type ([`payload`])
//! - Ed25519 and hashing helpers ([`crypto`])
//! - Hex encoding for identity keys ([`hexkey`])
//! - Trust-delegation records and their validator ([`introduction`])
//! - Protocol type definitions and constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod frame;
pub mod hexkey;
pub mod introduction;
pub mod payload;
pub mod types;

pub use crypto::ClockError;
pub use types::Pubkey;
