//! Majordomo client stub.
//!
//! One request, one reply: a [`Client`] wraps a payload in a REQUEST naming a
//! worker, sends it to the broker and waits a bounded time for the REPORT or
//! NAK. Retrying is left to the caller.

pub mod client;
pub mod error;

pub use client::{Client, Reply};
pub use error::{ClientError, ClientResult};
