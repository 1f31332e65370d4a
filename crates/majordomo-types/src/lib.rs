//! Core types for the Majordomo request/reply broker.
//!
//! This crate defines the data shared by the broker, the worker endpoint and
//! the client stub: the multi-frame [`message::Message`], the serialized
//! command headers that form the protocol envelope, timing and role
//! configuration, and protocol-level errors. It contains no I/O.

pub mod config;
pub mod error;
pub mod header;
pub mod message;
