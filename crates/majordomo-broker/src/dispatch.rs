//! Dispatcher: the broker's routing and liveness state machine.
//!
//! Takes router messages (routing identity first) and clock instants, and
//! returns the router messages to send in response. It owns the worker
//! registry but no socket, so the broker loop is the only place doing I/O.

use crate::registry::{PendingRequest, WorkerRegistry};
use majordomo_types::config::HeartbeatConfig;
use majordomo_types::error::{ProtocolError, ProtocolResult};
use majordomo_types::header::{
    ClientCommand, ClientCommandHeader, CommunicatorId, WorkerCommand, WorkerCommandHeader,
    MDPC_CLIENT, MDPW_WORKER,
};
use majordomo_types::message::Message;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Routing identity, protocol tag and header.
const MIN_FRAMES: usize = 3;

pub struct Dispatcher {
    registry: WorkerRegistry,
    outbox: Vec<Message>,
    terminate_requested: bool,
}

impl Dispatcher {
    pub fn new(heartbeat: HeartbeatConfig) -> Self {
        Self {
            registry: WorkerRegistry::new(heartbeat.expiry()),
            outbox: Vec::new(),
            terminate_requested: false,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Whether a client has asked the broker to shut down.
    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested
    }

    /// Process one inbound router message; returns the messages to route.
    ///
    /// Invalid messages are logged and dropped; they never fail the broker.
    pub fn handle(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        if let Err(e) = self.dispatch(msg, now) {
            warn!(error = %e, "Dropping invalid message");
        }
        std::mem::take(&mut self.outbox)
    }

    /// Heartbeat tick: purge expired workers, then heartbeat the rest.
    pub fn tick(&mut self, now: Instant) -> Vec<Message> {
        for entry in self.registry.purge(now) {
            info!(
                identity = %entry.identity,
                registered_at = %entry.registered_at,
                dropped_requests = entry.pending.len(),
                "Worker expired, removed"
            );
        }
        let waiting: Vec<String> = self.registry.waiting().map(str::to_string).collect();
        for identity in waiting {
            if let Err(e) = self.send_to_worker(&identity, WorkerCommand::Heartbeat, "", None) {
                warn!(identity = %identity, error = %e, "Cannot build HEARTBEAT");
            }
        }
        std::mem::take(&mut self.outbox)
    }

    fn dispatch(&mut self, mut msg: Message, now: Instant) -> ProtocolResult<()> {
        if msg.parts() < MIN_FRAMES {
            return Err(ProtocolError::TooFewFrames {
                expected: MIN_FRAMES,
                got: msg.parts(),
            });
        }
        let sender = msg.pop_front().unwrap_or_default();
        let protocol = msg.pop_front().unwrap_or_default();
        let sender = String::from_utf8_lossy(&sender).into_owned();
        if sender.is_empty() {
            return Err(ProtocolError::EmptyIdentity);
        }

        match protocol.as_ref() {
            p if p == MDPC_CLIENT.as_bytes() => self.handle_client(sender, msg),
            p if p == MDPW_WORKER.as_bytes() => self.handle_worker(sender, msg, now),
            other => Err(ProtocolError::UnknownProtocol(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    fn handle_worker(&mut self, identity: String, mut msg: Message, now: Instant) -> ProtocolResult<()> {
        let header_frame = msg.pop_front().unwrap_or_default();
        let header = WorkerCommandHeader::from_frame(&header_frame)?;
        let registered = self.registry.contains(&identity);
        debug!(identity = %identity, command = %header.command, registered, "Worker message");

        match header.command {
            WorkerCommand::Ready if registered => {
                // Reset: the worker has to announce itself again.
                self.evict(&identity)?;
                Err(unexpected(header.command, &identity))
            }
            WorkerCommand::Ready => {
                if !header.worker_id.is_empty() && header.worker_id != identity {
                    warn!(
                        identity = %identity,
                        announced = %header.worker_id,
                        "READY header names a different worker; using routing identity"
                    );
                }
                self.registry.register(&identity, now);
                info!(identity = %identity, workers = self.registry.len(), "Worker registered");
                Ok(())
            }
            WorkerCommand::Report if registered => {
                if header.client_id.is_empty() {
                    return Err(ProtocolError::EmptyIdentity);
                }
                let reply = ClientCommandHeader::new(
                    ClientCommand::Report,
                    CommunicatorId::SomeWorker,
                    CommunicatorId::Client,
                )
                .with_worker_id(identity.as_str())
                .with_client_id(header.client_id.as_str());
                self.send_to_client(&header.client_id, reply, msg)
            }
            WorkerCommand::Heartbeat if registered => {
                self.registry.refresh(&identity, now);
                Ok(())
            }
            WorkerCommand::Report | WorkerCommand::Heartbeat => {
                self.send_to_worker(&identity, WorkerCommand::Disconnect, "", None)?;
                Err(unexpected(header.command, &identity))
            }
            WorkerCommand::Disconnect => {
                if self.registry.remove(&identity).is_some() {
                    info!(identity = %identity, workers = self.registry.len(), "Worker disconnected");
                }
                Ok(())
            }
            WorkerCommand::Request => Err(unexpected(header.command, &identity)),
        }
    }

    fn handle_client(&mut self, client_id: String, mut msg: Message) -> ProtocolResult<()> {
        let header_frame = msg.pop_front().unwrap_or_default();
        let header = ClientCommandHeader::from_frame(&header_frame)?;
        debug!(
            client = %client_id,
            command = %header.command,
            receiver = %header.receiver,
            worker = %header.worker_id,
            "Client message"
        );

        match (header.receiver, header.command) {
            (CommunicatorId::SomeWorker, ClientCommand::Request) => {
                self.route_request(client_id, header.worker_id, msg)
            }
            (CommunicatorId::Broker, ClientCommand::CheckWorker) => {
                let known = self.registry.contains(&header.worker_id);
                let command = if known { ClientCommand::Ack } else { ClientCommand::Nak };
                let reply = broker_reply(command, &client_id).with_worker_id(header.worker_id);
                self.send_to_client(&client_id, reply, Message::new())
            }
            (CommunicatorId::Broker, ClientCommand::Terminate) => {
                info!(client = %client_id, "Termination requested");
                self.terminate_requested = true;
                self.send_to_client(&client_id, broker_reply(ClientCommand::Ack, &client_id), Message::new())
            }
            (_, command) => Err(unexpected(command, &client_id)),
        }
    }

    /// Queue a request for its worker, or NAK it straight back.
    fn route_request(&mut self, client_id: String, worker_id: String, payload: Message) -> ProtocolResult<()> {
        let Some(entry) = self.registry.get_mut(&worker_id) else {
            warn!(client = %client_id, worker = %worker_id, "Request for unknown worker, NAK");
            let reply = broker_reply(ClientCommand::Nak, &client_id).with_worker_id(worker_id);
            return self.send_to_client(&client_id, reply, payload);
        };
        entry.pending.push_back(PendingRequest { client_id, payload });

        let pending: Vec<PendingRequest> = entry.pending.drain(..).collect();
        for request in pending {
            self.send_to_worker(
                &worker_id,
                WorkerCommand::Request,
                &request.client_id,
                Some(request.payload),
            )?;
        }
        Ok(())
    }

    /// Evict a registered worker, telling it to disconnect.
    fn evict(&mut self, identity: &str) -> ProtocolResult<()> {
        if let Some(entry) = self.registry.remove(identity) {
            warn!(
                identity = %identity,
                dropped_requests = entry.pending.len(),
                "Evicting worker"
            );
        }
        self.send_to_worker(identity, WorkerCommand::Disconnect, "", None)
    }

    fn send_to_worker(
        &mut self,
        identity: &str,
        command: WorkerCommand,
        client_id: &str,
        payload: Option<Message>,
    ) -> ProtocolResult<()> {
        let header = WorkerCommandHeader::new(command, CommunicatorId::Broker, CommunicatorId::SomeWorker)
            .with_worker_id(identity)
            .with_client_id(client_id);
        let mut msg = payload.unwrap_or_default();
        msg.push_front(header.to_frame()?);
        msg.push_front(MDPW_WORKER);
        msg.push_front(identity.to_string());
        self.outbox.push(msg);
        Ok(())
    }

    fn send_to_client(
        &mut self,
        client_id: &str,
        header: ClientCommandHeader,
        mut payload: Message,
    ) -> ProtocolResult<()> {
        payload.push_front(header.to_frame()?);
        payload.push_front(MDPC_CLIENT);
        payload.push_front(client_id.to_string());
        self.outbox.push(payload);
        Ok(())
    }
}

fn broker_reply(command: ClientCommand, client_id: &str) -> ClientCommandHeader {
    ClientCommandHeader::new(command, CommunicatorId::Broker, CommunicatorId::Client)
        .with_client_id(client_id)
}

fn unexpected(command: impl std::fmt::Display, from: &str) -> ProtocolError {
    ProtocolError::UnexpectedCommand {
        command: command.to_string(),
        from: from.to_string(),
    }
}
