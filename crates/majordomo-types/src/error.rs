//! Protocol-level error types shared across the broker, worker and client.

use thiserror::Error;

/// A message did not follow the Majordomo envelope rules.
///
/// These are recoverable: the offending message is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The envelope is shorter than the protocol requires.
    #[error("Too few frames: expected at least {expected}, got {got}")]
    TooFewFrames {
        /// Minimum frame count for this envelope.
        expected: usize,
        /// Frames actually present.
        got: usize,
    },

    /// The protocol tag frame named neither the client nor the worker protocol.
    #[error("Unknown protocol tag: {0}")]
    UnknownProtocol(String),

    /// The header frame could not be decoded.
    #[error("Malformed command header: {0}")]
    MalformedHeader(String),

    /// A well-formed command arrived where it makes no sense.
    #[error("Unexpected command {command} from {from}")]
    UnexpectedCommand {
        /// The command kind received.
        command: String,
        /// Who sent it.
        from: String,
    },

    /// An identity was required but empty.
    #[error("Empty identity")]
    EmptyIdentity,
}

/// Alias for Result with ProtocolError.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
