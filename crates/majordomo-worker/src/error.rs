//! Endpoint error types.

use majordomo_types::error::ProtocolError;
use majordomo_types::header::CommunicatorId;
use majordomo_wire::WireError;
use thiserror::Error;

/// Errors reported to the application thread.
///
/// `Clone` so a failure captured on the network thread can be handed over
/// without sharing the original.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// A transport error on one of the links.
    #[error("Link error: {0}")]
    Wire(String),

    /// A malformed envelope.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Nothing arrived from the broker for longer than the liveness window.
    #[error("Broker lost: silent for {silent_ms}ms")]
    BrokerLost { silent_ms: u64 },

    /// The counterpart closed the link.
    #[error("{0} disconnected")]
    Disconnected(CommunicatorId),

    /// No link is configured for this target.
    #[error("No link to {0}")]
    NotConnected(CommunicatorId),

    #[error("Endpoint already started")]
    AlreadyStarted,

    /// The network thread has exited without a failure.
    #[error("Endpoint stopped")]
    Stopped,

    /// The network thread panicked.
    #[error("Network thread panicked: {0}")]
    Panicked(String),

    /// The network thread or its runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<WireError> for EndpointError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::LivenessExpired { silent_ms } => Self::BrokerLost { silent_ms },
            WireError::Protocol(p) => Self::Protocol(p),
            other => Self::Wire(other.to_string()),
        }
    }
}

/// Alias for endpoint results.
pub type EndpointResult<T> = Result<T, EndpointError>;
