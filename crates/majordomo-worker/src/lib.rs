//! Worker-side network endpoint.
//!
//! A [`WorkerEndpoint`] keeps one link to the broker and up to two links to
//! neighbouring workers alive on a dedicated thread. The application thread
//! only exchanges payloads with it through channels and never touches a socket.
//! Failures inside the network thread are captured and reported on the
//! application's next blocking call.

pub mod endpoint;
pub mod error;
mod reactor;

pub use endpoint::WorkerEndpoint;
pub use error::{EndpointError, EndpointResult};
