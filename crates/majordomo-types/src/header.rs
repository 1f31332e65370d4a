//! Command headers and protocol constants.
//!
//! Every message on the broker socket carries, after the routing identity,
//! a protocol tag frame and a serialized [`CommandHeader`]:
//!
//! ```text
//! Frame 1:     routing identity (added/stripped by the transport)
//! Frame 2:     "MDPC0X" | "MDPW0X"
//! Frame 3:     CommandHeader (MessagePack)
//! Frame 4..n:  application frames
//! ```
//!
//! Peer links between workers use the same header type with the peer
//! protocol tag.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Frame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol tag for client <-> broker traffic.
pub const MDPC_CLIENT: &str = "MDPC0X";

/// Protocol tag for worker <-> broker traffic.
pub const MDPW_WORKER: &str = "MDPW0X";

/// Protocol tag for worker <-> worker peer traffic.
pub const MDPP_PEER: &str = "MDPP0X";

/// Role of a communicating party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommunicatorId {
    Undefined,
    Client,
    Broker,
    LeftNeighbour,
    RightNeighbour,
    /// A worker addressed by identity.
    SomeWorker,
}

impl fmt::Display for CommunicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Client => write!(f, "client"),
            Self::Broker => write!(f, "broker"),
            Self::LeftNeighbour => write!(f, "left-neighbour"),
            Self::RightNeighbour => write!(f, "right-neighbour"),
            Self::SomeWorker => write!(f, "worker"),
        }
    }
}

/// A closed set of command kinds bound to one protocol tag.
pub trait CommandKind:
    Copy + Eq + fmt::Debug + fmt::Display + Serialize + DeserializeOwned
{
    /// The protocol tag frame that precedes headers of this kind.
    const PROTOCOL: &'static str;
}

/// Commands exchanged between workers and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerCommand {
    Ready,
    Request,
    Report,
    Heartbeat,
    Disconnect,
}

impl CommandKind for WorkerCommand {
    const PROTOCOL: &'static str = MDPW_WORKER;
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Request => write!(f, "REQUEST"),
            Self::Report => write!(f, "REPORT"),
            Self::Heartbeat => write!(f, "HEARTBEAT"),
            Self::Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

/// Commands exchanged between clients and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientCommand {
    Request,
    Report,
    /// The named worker is unknown to the broker.
    Nak,
    /// Administrative: is this worker registered?
    CheckWorker,
    /// Administrative: ask the broker to shut down.
    Terminate,
    /// Positive answer to an administrative command.
    Ack,
}

impl CommandKind for ClientCommand {
    const PROTOCOL: &'static str = MDPC_CLIENT;
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "REQUEST"),
            Self::Report => write!(f, "REPORT"),
            Self::Nak => write!(f, "NAK"),
            Self::CheckWorker => write!(f, "CHECK_WORKER"),
            Self::Terminate => write!(f, "TERMINATE"),
            Self::Ack => write!(f, "ACK"),
        }
    }
}

/// Commands exchanged directly between neighbouring workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerCommand {
    /// Greeting sent by the initiating side, echoed by the acceptor.
    Hello,
    /// Application payload.
    Relay,
    /// The sender is closing the link.
    Bye,
}

impl CommandKind for PeerCommand {
    const PROTOCOL: &'static str = MDPP_PEER;
}

impl fmt::Display for PeerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello => write!(f, "HELLO"),
            Self::Relay => write!(f, "RELAY"),
            Self::Bye => write!(f, "BYE"),
        }
    }
}

/// Serializable command header; one frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHeader<C> {
    /// Protocol tag, duplicated inside the header for cross-checking.
    pub protocol: String,
    pub command: C,
    pub sender: CommunicatorId,
    pub receiver: CommunicatorId,
    /// Identity of the worker this message concerns (may be empty).
    #[serde(default)]
    pub worker_id: String,
    /// Identity of the client this message concerns (may be empty).
    #[serde(default)]
    pub client_id: String,
}

/// Header for worker protocol messages.
pub type WorkerCommandHeader = CommandHeader<WorkerCommand>;

/// Header for client protocol messages.
pub type ClientCommandHeader = CommandHeader<ClientCommand>;

/// Header for peer protocol messages.
pub type PeerCommandHeader = CommandHeader<PeerCommand>;

impl<C: CommandKind> CommandHeader<C> {
    pub fn new(command: C, sender: CommunicatorId, receiver: CommunicatorId) -> Self {
        Self {
            protocol: C::PROTOCOL.to_string(),
            command,
            sender,
            receiver,
            worker_id: String::new(),
            client_id: String::new(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Serialize into a single frame.
    pub fn to_frame(&self) -> ProtocolResult<Frame> {
        rmp_serde::to_vec_named(self)
            .map(Frame::from)
            .map_err(|e| ProtocolError::MalformedHeader(e.to_string()))
    }

    /// Decode a header frame, rejecting headers of a different protocol.
    pub fn from_frame(frame: &[u8]) -> ProtocolResult<Self> {
        let header: Self = rmp_serde::from_slice(frame)
            .map_err(|e| ProtocolError::MalformedHeader(e.to_string()))?;
        if header.protocol != C::PROTOCOL {
            return Err(ProtocolError::MalformedHeader(format!(
                "header protocol {} does not match {}",
                header.protocol,
                C::PROTOCOL
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_header_roundtrip() {
        let header = WorkerCommandHeader::new(
            WorkerCommand::Report,
            CommunicatorId::SomeWorker,
            CommunicatorId::Broker,
        )
        .with_worker_id("W1")
        .with_client_id("C1");
        let frame = header.to_frame().unwrap();
        let decoded = WorkerCommandHeader::from_frame(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.protocol, MDPW_WORKER);
    }

    #[test]
    fn test_cross_protocol_header_rejected() {
        let frame = ClientCommandHeader::new(
            ClientCommand::Request,
            CommunicatorId::Client,
            CommunicatorId::SomeWorker,
        )
        .to_frame()
        .unwrap();
        let err = WorkerCommandHeader::from_frame(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[test]
    fn test_garbage_header_rejected() {
        let err = ClientCommandHeader::from_frame(b"\x01not a header").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(WorkerCommand::Heartbeat.to_string(), "HEARTBEAT");
        assert_eq!(ClientCommand::Nak.to_string(), "NAK");
        assert_eq!(PeerCommand::Relay.to_string(), "RELAY");
        assert_eq!(CommunicatorId::LeftNeighbour.to_string(), "left-neighbour");
    }
}
