//! Client error types.

use majordomo_types::error::ProtocolError;
use majordomo_wire::WireError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Broker link error: {0}")]
    Wire(#[from] WireError),

    #[error("Invalid reply: {0}")]
    Protocol(#[from] ProtocolError),

    /// No reply within the configured timeout. Not fatal; the client stays usable.
    #[error("No reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

pub type ClientResult<T> = Result<T, ClientError>;
