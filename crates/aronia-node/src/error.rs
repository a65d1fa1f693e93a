use aronia_core::frame::FrameError;
use aronia_core::introduction::IntroductionError;
use aronia_core::payload::PayloadError;
use aronia_core::ClockError;
use thiserror::Error;

/// Errors that can occur during node operation.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The addressed peer has no active session, or its session was torn
    /// down while the operation was in flight.
    #[error("peer is offline")]
    PeerOffline,
    /// A request's deadline elapsed before a response arrived.
    #[error("request timed out")]
    RequestTimeout,
    /// Signature verification or an admission check failed.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// A frame was malformed at the wire level.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
    /// A frame payload did not match its type's JSON schema.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// An introduction record failed validation.
    #[error("introduction rejected: {0}")]
    Introduction(#[from] IntroductionError),
    /// A parked write exceeded the backpressure timeout.
    #[error("write parked past the backpressure deadline")]
    Backpressure,
    /// The system clock is unusable.
    #[error(transparent)]
    Clock(#[from] ClockError),
    /// The underlying swarm reported a failure.
    #[error("swarm error: {0}")]
    Swarm(String),
    /// The remote handler answered a request with an error.
    #[error("remote error ({code}): {message}")]
    Remote {
        /// Machine-readable error code from the remote registry.
        code: String,
        /// Human-readable error description.
        message: String,
    },
    /// No pending introduction exists for the given key.
    #[error("no pending introduction for that pubkey")]
    UnknownIntroduction,
    /// Node configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}
