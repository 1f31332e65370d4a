//! BrokerConnection: the worker's link to the broker.
//!
//! Registers with READY on connect, keeps the broker informed with periodic
//! HEARTBEATs, turns REQUESTs into application deliveries and wraps outgoing
//! application payloads as REPORTs addressed to the requesting client.

use crate::codec::WireError;
use crate::connection::{Connection, Incoming};
use crate::dealer::DealerSocket;
use async_trait::async_trait;
use majordomo_types::config::HeartbeatConfig;
use majordomo_types::error::ProtocolError;
use majordomo_types::header::{CommunicatorId, WorkerCommand, WorkerCommandHeader, MDPW_WORKER};
use majordomo_types::message::Message;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct BrokerConnection {
    identity: String,
    addr: SocketAddr,
    heartbeat: HeartbeatConfig,
    connect_timeout: Duration,
    socket: Option<DealerSocket>,
    /// Clients whose requests have not been answered yet, oldest first.
    reply_to: VecDeque<String>,
    /// Client of the most recent REPORT.
    last_client: Option<String>,
    /// Last time anything arrived from the broker.
    last_seen: Instant,
}

impl BrokerConnection {
    pub fn new(
        identity: impl Into<String>,
        addr: SocketAddr,
        heartbeat: HeartbeatConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            identity: identity.into(),
            addr,
            heartbeat,
            connect_timeout,
            socket: None,
            reply_to: VecDeque::new(),
            last_client: None,
            last_seen: Instant::now(),
        }
    }

    /// Number of delivered requests not yet answered with a REPORT.
    pub fn pending_replies(&self) -> usize {
        self.reply_to.len()
    }

    async fn send_command(
        &mut self,
        command: WorkerCommand,
        client_id: &str,
        payload: Option<Message>,
    ) -> Result<(), WireError> {
        let socket = self.socket.as_mut().ok_or(WireError::NotConnected)?;
        let header = WorkerCommandHeader::new(
            command,
            CommunicatorId::SomeWorker,
            CommunicatorId::Broker,
        )
        .with_worker_id(self.identity.as_str())
        .with_client_id(client_id);

        let mut msg = payload.unwrap_or_default();
        msg.push_front(header.to_frame()?);
        msg.push_front(MDPW_WORKER);
        debug!(identity = %self.identity, %command, "Sending to broker");
        socket.send(&msg).await
    }
}

#[async_trait]
impl Connection for BrokerConnection {
    fn comm_id(&self) -> CommunicatorId {
        CommunicatorId::Broker
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> Result<(), WireError> {
        debug_assert!(!self.identity.is_empty(), "worker identity must not be empty");
        if self.identity.is_empty() {
            return Err(ProtocolError::EmptyIdentity.into());
        }
        let socket = DealerSocket::connect(self.addr, &self.identity, self.connect_timeout).await?;
        self.socket = Some(socket);
        self.send_command(WorkerCommand::Ready, "", None).await?;

        self.last_seen = Instant::now();
        info!(identity = %self.identity, broker = %self.addr, "Registered with broker");
        Ok(())
    }

    async fn send(&mut self, payload: Message) -> Result<(), WireError> {
        let Some(client) = self.reply_to.pop_front().or_else(|| self.last_client.clone()) else {
            warn!(identity = %self.identity, "REPORT with no requesting client, dropping");
            return Ok(());
        };
        self.send_command(WorkerCommand::Report, &client, Some(payload))
            .await?;
        self.last_client = Some(client);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Incoming, WireError> {
        let socket = self.socket.as_mut().ok_or(WireError::NotConnected)?;
        let mut msg = socket.recv().await?;
        self.last_seen = Instant::now();

        let (Some(protocol), Some(header_frame)) = (msg.pop_front(), msg.pop_front()) else {
            warn!(identity = %self.identity, "Broker message too short, dropping");
            return Ok(Incoming::Housekeeping);
        };
        if protocol.as_ref() != MDPW_WORKER.as_bytes() {
            warn!(
                identity = %self.identity,
                protocol = %String::from_utf8_lossy(&protocol),
                "Unexpected protocol from broker, dropping"
            );
            return Ok(Incoming::Housekeeping);
        }
        let header = match WorkerCommandHeader::from_frame(&header_frame) {
            Ok(h) => h,
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Bad header from broker, dropping");
                return Ok(Incoming::Housekeeping);
            }
        };

        match header.command {
            WorkerCommand::Request => {
                self.reply_to.push_back(header.client_id);
                Ok(Incoming::Deliver(msg))
            }
            WorkerCommand::Heartbeat => Ok(Incoming::Housekeeping),
            WorkerCommand::Disconnect => {
                info!(identity = %self.identity, "Broker sent DISCONNECT");
                Ok(Incoming::Disconnect)
            }
            other => {
                warn!(identity = %self.identity, command = %other, "Invalid command from broker, dropping");
                Ok(Incoming::Housekeeping)
            }
        }
    }

    /// One HEARTBEAT per call; the caller's tick sets the pace.
    async fn on_tick(&mut self) -> Result<(), WireError> {
        if self.socket.is_none() {
            return Ok(());
        }
        let silent = self.last_seen.elapsed();
        if silent > self.heartbeat.expiry() {
            return Err(WireError::LivenessExpired {
                silent_ms: silent.as_millis() as u64,
            });
        }
        self.send_command(WorkerCommand::Heartbeat, "", None).await
    }

    async fn close(&mut self, graceful: bool) -> Result<(), WireError> {
        if self.socket.is_none() {
            return Ok(());
        }
        let notice = if graceful {
            self.send_command(WorkerCommand::Disconnect, "", None).await
        } else {
            Ok(())
        };
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.shutdown().await;
        }
        info!(identity = %self.identity, graceful, "Broker link closed");
        notice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterSocket;

    fn fast_heartbeat() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_ms: 50,
            liveness: 3,
        }
    }

    fn decode(msg: &mut Message) -> WorkerCommandHeader {
        assert_eq!(msg.pop_front().unwrap().as_ref(), b"W1");
        assert_eq!(msg.pop_front().unwrap().as_ref(), MDPW_WORKER.as_bytes());
        WorkerCommandHeader::from_frame(&msg.pop_front().unwrap()).unwrap()
    }

    fn request_for(client: &str, payload: &str) -> Message {
        let header = WorkerCommandHeader::new(
            WorkerCommand::Request,
            CommunicatorId::Broker,
            CommunicatorId::SomeWorker,
        )
        .with_worker_id("W1")
        .with_client_id(client);
        let mut msg = Message::from(payload);
        msg.push_front(header.to_frame().unwrap());
        msg.push_front(MDPW_WORKER);
        msg.push_front("W1");
        msg
    }

    #[tokio::test]
    async fn test_connect_sends_ready() {
        let mut router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut link = BrokerConnection::new(
            "W1",
            router.local_addr(),
            fast_heartbeat(),
            Duration::from_secs(2),
        );
        link.connect().await.unwrap();
        assert!(link.is_connected());

        let mut msg = router.recv().await.unwrap();
        let header = decode(&mut msg);
        assert_eq!(header.command, WorkerCommand::Ready);
        assert_eq!(header.worker_id, "W1");
    }

    #[tokio::test]
    async fn test_reports_follow_request_order() {
        let mut router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut link = BrokerConnection::new(
            "W1",
            router.local_addr(),
            fast_heartbeat(),
            Duration::from_secs(2),
        );
        link.connect().await.unwrap();
        let _ready = router.recv().await.unwrap();

        assert!(router.send(request_for("C1", "a")));
        assert!(router.send(request_for("C2", "b")));
        assert_eq!(link.recv().await.unwrap(), Incoming::Deliver(Message::from("a")));
        assert_eq!(link.recv().await.unwrap(), Incoming::Deliver(Message::from("b")));
        assert_eq!(link.pending_replies(), 2);

        link.send(Message::from("ra")).await.unwrap();
        link.send(Message::from("rb")).await.unwrap();
        // A third report goes to the most recent client.
        link.send(Message::from("rb2")).await.unwrap();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut msg = router.recv().await.unwrap();
            let header = decode(&mut msg);
            assert_eq!(header.command, WorkerCommand::Report);
            clients.push(header.client_id);
        }
        assert_eq!(clients, vec!["C1", "C2", "C2"]);
    }

    #[tokio::test]
    async fn test_tick_sends_heartbeat_and_detects_silent_broker() {
        let mut router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut link = BrokerConnection::new(
            "W1",
            router.local_addr(),
            fast_heartbeat(),
            Duration::from_secs(2),
        );
        link.connect().await.unwrap();
        let _ready = router.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        link.on_tick().await.unwrap();
        let mut msg = router.recv().await.unwrap();
        assert_eq!(decode(&mut msg).command, WorkerCommand::Heartbeat);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = link.on_tick().await.unwrap_err();
        assert!(matches!(err, WireError::LivenessExpired { .. }));
    }

    #[tokio::test]
    async fn test_every_tick_sends_a_heartbeat() {
        let mut router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut link = BrokerConnection::new(
            "W1",
            router.local_addr(),
            fast_heartbeat(),
            Duration::from_secs(2),
        );
        link.connect().await.unwrap();
        let _ready = router.recv().await.unwrap();

        // Back-to-back ticks, as when the reactor's interval fires early or late.
        for _ in 0..5 {
            link.on_tick().await.unwrap();
        }
        for _ in 0..5 {
            let mut msg = router.recv().await.unwrap();
            assert_eq!(decode(&mut msg).command, WorkerCommand::Heartbeat);
        }
    }

    #[tokio::test]
    #[cfg_attr(
        debug_assertions,
        should_panic(expected = "worker identity must not be empty")
    )]
    async fn test_empty_identity_rejected() {
        let addr = "127.0.0.1:9".parse().unwrap();
        let mut link = BrokerConnection::new("", addr, fast_heartbeat(), Duration::from_millis(10));
        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(ProtocolError::EmptyIdentity)));
    }
}
