//! PeerConnection: a direct worker-to-worker link.
//!
//! Neighbour links bypass the broker. The left neighbour link initiates: it
//! connects and sends HELLO. The right neighbour link accepts: it binds its
//! configured address, takes one connection and waits for HELLO before it
//! answers with its own HELLO. Once both greetings are exchanged the link only
//! carries RELAY frames, and BYE closes it.

use crate::codec::WireError;
use crate::connection::{Connection, Incoming};
use crate::dealer::DealerSocket;
use async_trait::async_trait;
use majordomo_types::error::ProtocolError;
use majordomo_types::header::{CommunicatorId, PeerCommand, PeerCommandHeader, MDPP_PEER};
use majordomo_types::message::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Which side of the pairwise link this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Connects and greets first.
    Initiator,
    /// Binds, waits for the greeting, then answers it.
    Acceptor,
}

pub struct PeerConnection {
    comm_id: CommunicatorId,
    role: PeerRole,
    identity: String,
    addr: SocketAddr,
    connect_timeout: Duration,
    socket: Option<DealerSocket>,
    remote_identity: Option<String>,
}

impl PeerConnection {
    /// Link to the left neighbour; this side initiates.
    pub fn left(identity: impl Into<String>, addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self::new(
            CommunicatorId::LeftNeighbour,
            PeerRole::Initiator,
            identity.into(),
            addr,
            connect_timeout,
        )
    }

    /// Link to the right neighbour; this side accepts on `addr`.
    pub fn right(identity: impl Into<String>, addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self::new(
            CommunicatorId::RightNeighbour,
            PeerRole::Acceptor,
            identity.into(),
            addr,
            connect_timeout,
        )
    }

    fn new(
        comm_id: CommunicatorId,
        role: PeerRole,
        identity: String,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            comm_id,
            role,
            identity,
            addr,
            connect_timeout,
            socket: None,
            remote_identity: None,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Identity the neighbour announced in its HELLO.
    pub fn remote_identity(&self) -> Option<&str> {
        self.remote_identity.as_deref()
    }

    async fn send_command(
        &mut self,
        command: PeerCommand,
        payload: Option<Message>,
    ) -> Result<(), WireError> {
        let socket = self.socket.as_mut().ok_or(WireError::NotConnected)?;
        let header = PeerCommandHeader::new(
            command,
            CommunicatorId::SomeWorker,
            CommunicatorId::SomeWorker,
        )
        .with_worker_id(self.identity.as_str());
        let mut msg = payload.unwrap_or_default();
        msg.push_front(header.to_frame()?);
        msg.push_front(MDPP_PEER);
        socket.send(&msg).await
    }

    /// Wait for the neighbour's HELLO until `deadline`.
    async fn expect_hello(&mut self, deadline: Instant) -> Result<String, WireError> {
        let socket = self.socket.as_mut().ok_or(WireError::NotConnected)?;
        let msg = tokio::time::timeout_at(deadline, socket.recv())
            .await
            .map_err(|_| WireError::HandshakeFailed("no HELLO before timeout".into()))??;
        let (header, _) = split_envelope(msg)?;
        if header.command != PeerCommand::Hello {
            return Err(WireError::HandshakeFailed(format!(
                "expected HELLO, got {}",
                header.command
            )));
        }
        Ok(header.worker_id)
    }

    /// Run this side of the greeting exchange; returns the neighbour's identity.
    async fn handshake(&mut self) -> Result<String, WireError> {
        let deadline = Instant::now() + self.connect_timeout;
        match self.role {
            PeerRole::Initiator => {
                let socket =
                    DealerSocket::connect(self.addr, &self.identity, self.connect_timeout).await?;
                self.socket = Some(socket);
                self.send_command(PeerCommand::Hello, None).await?;
                self.expect_hello(deadline).await
            }
            PeerRole::Acceptor => {
                let listener = TcpListener::bind(self.addr).await?;
                debug!(addr = %self.addr, "Waiting for neighbour");
                let socket = DealerSocket::accept(&listener, self.connect_timeout).await?;
                self.socket = Some(socket);
                let remote = self.expect_hello(deadline).await?;
                self.send_command(PeerCommand::Hello, None).await?;
                Ok(remote)
            }
        }
    }
}

/// Split `[MDPP0X, header, payload...]` into header and payload.
fn split_envelope(mut msg: Message) -> Result<(PeerCommandHeader, Message), ProtocolError> {
    let parts = msg.parts();
    let (Some(protocol), Some(header_frame)) = (msg.pop_front(), msg.pop_front()) else {
        return Err(ProtocolError::TooFewFrames {
            expected: 2,
            got: parts,
        });
    };
    if protocol.as_ref() != MDPP_PEER.as_bytes() {
        return Err(ProtocolError::UnknownProtocol(
            String::from_utf8_lossy(&protocol).into_owned(),
        ));
    }
    let header = PeerCommandHeader::from_frame(&header_frame)?;
    Ok((header, msg))
}

#[async_trait]
impl Connection for PeerConnection {
    fn comm_id(&self) -> CommunicatorId {
        self.comm_id
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> Result<(), WireError> {
        let remote = match self.handshake().await {
            Ok(remote) => remote,
            Err(e) => {
                self.socket = None;
                return Err(e);
            }
        };
        info!(
            identity = %self.identity,
            link = %self.comm_id,
            remote = %remote,
            role = ?self.role,
            "Neighbour link established"
        );
        self.remote_identity = Some(remote);
        Ok(())
    }

    async fn send(&mut self, payload: Message) -> Result<(), WireError> {
        self.send_command(PeerCommand::Relay, Some(payload)).await
    }

    async fn recv(&mut self) -> Result<Incoming, WireError> {
        let socket = self.socket.as_mut().ok_or(WireError::NotConnected)?;
        let msg = socket.recv().await?;
        let (header, payload) = match split_envelope(msg) {
            Ok(split) => split,
            Err(e) => {
                warn!(link = %self.comm_id, error = %e, "Invalid neighbour message, dropping");
                return Ok(Incoming::Housekeeping);
            }
        };
        match header.command {
            PeerCommand::Relay => Ok(Incoming::Deliver(payload)),
            PeerCommand::Bye => {
                info!(link = %self.comm_id, remote = %header.worker_id, "Neighbour said BYE");
                Ok(Incoming::Disconnect)
            }
            PeerCommand::Hello => {
                debug!(link = %self.comm_id, "Duplicate HELLO ignored");
                Ok(Incoming::Housekeeping)
            }
        }
    }

    async fn close(&mut self, graceful: bool) -> Result<(), WireError> {
        if self.socket.is_none() {
            return Ok(());
        }
        let notice = if graceful {
            self.send_command(PeerCommand::Bye, None).await
        } else {
            Ok(())
        };
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.shutdown().await;
        }
        debug!(link = %self.comm_id, graceful, "Neighbour link closed");
        notice
    }
}
