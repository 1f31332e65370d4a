//! Majordomo wire layer: framed TCP transport and connection links.
//!
//! Provides the addressed messaging transport the broker and workers run on,
//! plus the worker-side links built on top of it.
//!
//! ## Architecture
//!
//! - **codec**: multi-frame message framing over any async byte stream
//! - **RouterSocket**: listening socket that tags inbound messages with the
//!   sender's routing identity and routes outbound messages by it
//! - **DealerSocket**: one framed TCP link that announces an identity
//! - **Connection**: the contract shared by the worker's broker link
//!   ([`BrokerConnection`]) and its neighbour links ([`PeerConnection`])

pub mod broker_link;
pub mod codec;
pub mod connection;
pub mod dealer;
pub mod peer_link;
pub mod router;

pub use broker_link::BrokerConnection;
pub use codec::{read_message, write_message, WireError};
pub use connection::{Connection, Incoming};
pub use dealer::DealerSocket;
pub use peer_link::{PeerConnection, PeerRole};
pub use router::RouterSocket;
