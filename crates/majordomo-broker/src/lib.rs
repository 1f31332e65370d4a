//! Majordomo broker.
//!
//! A single-threaded event loop that tracks a dynamic set of workers, forwards
//! client requests to the worker they name, relays worker reports back to the
//! requesting client and evicts workers that stop heartbeating.
//!
//! Routing and liveness decisions live in the socket-free [`Dispatcher`]; the
//! [`Broker`] only moves messages between it and the [`RouterSocket`].
//!
//! [`RouterSocket`]: majordomo_wire::RouterSocket

pub mod broker;
pub mod dispatch;
pub mod error;
pub mod registry;

pub use broker::{Broker, ShutdownHandle};
pub use dispatch::Dispatcher;
pub use error::{BrokerError, BrokerResult};
pub use registry::{PendingRequest, WorkerEntry, WorkerRegistry};
