//! ARONIA node runtime — peer sessions, RPC multiplexing, and
//! introduction-based trust over an external DHT swarm.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Node configuration structures and file/env loading.
pub mod config;
/// Error types for node operations.
pub mod error;
/// Events surfaced to the embedding application.
pub mod events;
/// Metric instrumentation points.
pub mod metrics;
/// Node runtime, admission, and the trust engine.
pub mod node;
/// RPC method registry.
pub mod registry;
mod session;
mod sessions;
/// The consumed swarm interface and the in-process implementation.
pub mod swarm;

pub use config::{load_config, NodeConfig, TrustConfig};
pub use error::NodeError;
pub use events::{NodeEvent, PeerInfo};
pub use node::{BroadcastOutcome, Node};
pub use registry::{MethodError, MethodRegistry, PeerContext};
pub use swarm::{MemorySwarm, Swarm, SwarmError, SwarmStream};
