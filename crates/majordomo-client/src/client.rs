//! Client: addresses a specific worker through the broker.

use crate::error::{ClientError, ClientResult};
use majordomo_types::config::ClientConfig;
use majordomo_types::error::ProtocolError;
use majordomo_types::header::{ClientCommand, ClientCommandHeader, CommunicatorId, MDPC_CLIENT};
use majordomo_types::message::Message;
use majordomo_wire::DealerSocket;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A decoded reply from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// REPORT, NAK or (for administrative calls) ACK.
    pub command: ClientCommand,
    /// Worker the reply concerns.
    pub from: String,
    pub payload: Message,
}

pub struct Client {
    socket: DealerSocket,
    timeout: Duration,
}

impl Client {
    /// Connect to the broker named in `config`.
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let socket =
            DealerSocket::connect(config.broker_addr, &config.identity, config.timeout()).await?;
        debug!(broker = %config.broker_addr, identity = %config.identity, "Client connected");
        Ok(Self {
            socket,
            timeout: config.timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bound for every subsequent `recv` and administrative call.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn send_command(
        &mut self,
        command: ClientCommand,
        receiver: CommunicatorId,
        worker_id: &str,
        payload: Message,
    ) -> ClientResult<()> {
        let header = ClientCommandHeader::new(command, CommunicatorId::Client, receiver)
            .with_worker_id(worker_id);
        let mut msg = payload;
        msg.push_front(header.to_frame()?);
        msg.push_front(MDPC_CLIENT);
        self.socket.send(&msg).await?;
        Ok(())
    }

    /// Send `payload` as a REQUEST for `worker_id`.
    pub async fn send_to_worker(&mut self, payload: Message, worker_id: &str) -> ClientResult<()> {
        debug_assert!(!worker_id.is_empty(), "worker identity must not be empty");
        if worker_id.is_empty() {
            return Err(ProtocolError::EmptyIdentity.into());
        }
        self.send_command(
            ClientCommand::Request,
            CommunicatorId::SomeWorker,
            worker_id,
            payload,
        )
        .await
    }

    /// Wait up to the timeout for one reply.
    pub async fn recv(&mut self) -> ClientResult<Reply> {
        let deadline = Instant::now() + self.timeout;
        self.recv_until(deadline).await
    }

    async fn recv_until(&mut self, deadline: Instant) -> ClientResult<Reply> {
        let mut msg = tokio::time::timeout_at(deadline, self.socket.recv())
            .await
            .map_err(|_| ClientError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        let parts = msg.parts();
        let (Some(protocol), Some(header_frame)) = (msg.pop_front(), msg.pop_front()) else {
            return Err(ProtocolError::TooFewFrames {
                expected: 2,
                got: parts,
            }
            .into());
        };
        if protocol.as_ref() != MDPC_CLIENT.as_bytes() {
            return Err(ProtocolError::UnknownProtocol(
                String::from_utf8_lossy(&protocol).into_owned(),
            )
            .into());
        }
        let header = ClientCommandHeader::from_frame(&header_frame)?;
        Ok(Reply {
            command: header.command,
            from: header.worker_id,
            payload: msg,
        })
    }

    /// Send a request and wait for its reply.
    pub async fn request(&mut self, payload: Message, worker_id: &str) -> ClientResult<Reply> {
        self.send_to_worker(payload, worker_id).await?;
        self.recv().await
    }

    /// Ask the broker whether `worker_id` is registered.
    pub async fn check_worker(&mut self, worker_id: &str) -> bool {
        self.admin(ClientCommand::CheckWorker, worker_id).await
    }

    /// Ask the broker to shut down. True once the broker acknowledged.
    pub async fn request_broker_termination(&mut self) -> bool {
        self.admin(ClientCommand::Terminate, "").await
    }

    /// One administrative round-trip. Late REPORTs from earlier requests are
    /// skipped; any failure counts as a negative answer.
    async fn admin(&mut self, command: ClientCommand, worker_id: &str) -> bool {
        if let Err(e) = self
            .send_command(command, CommunicatorId::Broker, worker_id, Message::new())
            .await
        {
            warn!(%command, error = %e, "Administrative request failed");
            return false;
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.recv_until(deadline).await {
                Ok(reply) if reply.command == ClientCommand::Ack => return true,
                Ok(reply) if reply.command == ClientCommand::Nak => return false,
                Ok(reply) => {
                    debug!(command = %reply.command, from = %reply.from, "Skipping stale reply");
                }
                Err(e) => {
                    debug!(%command, error = %e, "No administrative reply");
                    return false;
                }
            }
        }
    }
}
