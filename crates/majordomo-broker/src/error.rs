//! Broker error types.

use majordomo_wire::WireError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that stop the broker. Everything a peer can cause is handled
/// inside the event loop and never surfaces here.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The listen address could not be bound (usually already in use).
    #[error("Cannot bind broker to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: WireError,
    },

    /// The router socket stopped delivering messages.
    #[error("Broker socket closed unexpectedly")]
    SocketClosed,
}

/// Alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;
