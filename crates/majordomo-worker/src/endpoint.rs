//! WorkerEndpoint: the application-facing side of a worker.
//!
//! `start()` spawns a network thread with its own single-threaded tokio
//! runtime, establishes every configured link there and only returns once
//! they are all up (or one of them failed). Afterwards the application talks
//! to the thread exclusively through channels:
//!
//! - `send_message` hands a payload over to the network thread (ownership moves
//!   with the channel write);
//! - `receive_message` blocks until a payload from the named link arrives;
//! - `stop` asks the thread to close its links and optionally joins it.
//!
//! A failure on the network thread lands in a single shared slot and is
//! returned by the next blocking call, exactly once.
//!
//! The blocking calls must not be made from inside an async runtime.

use crate::error::{EndpointError, EndpointResult};
use crate::reactor::{lock, AppCommand, Links, Reactor, Shared, SharedState};
use majordomo_types::config::WorkerConfig;
use majordomo_types::error::ProtocolError;
use majordomo_types::header::CommunicatorId;
use majordomo_types::message::Message;
use majordomo_wire::{BrokerConnection, Connection, PeerConnection};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

struct Running {
    commands: mpsc::UnboundedSender<AppCommand>,
    inboxes: HashMap<CommunicatorId, mpsc::UnboundedReceiver<Message>>,
    thread: Option<JoinHandle<()>>,
}

pub struct WorkerEndpoint {
    config: WorkerConfig,
    shared: Shared,
    running: Option<Running>,
}

impl WorkerEndpoint {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(SharedState::default())),
            running: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Links this endpoint is configured to maintain.
    pub fn targets(&self) -> Vec<CommunicatorId> {
        let c = &self.config;
        [
            (c.broker_addr.is_some(), CommunicatorId::Broker),
            (c.left_addr.is_some(), CommunicatorId::LeftNeighbour),
            (c.right_addr.is_some(), CommunicatorId::RightNeighbour),
        ]
        .into_iter()
        .filter_map(|(configured, target)| configured.then_some(target))
        .collect()
    }

    /// Connect every configured link and launch the network thread.
    ///
    /// Blocks until the broker has been sent READY and both neighbour
    /// handshakes completed, bounded by the configured connect timeout.
    pub fn start(&mut self) -> EndpointResult<()> {
        if self.running.is_some() {
            return Err(EndpointError::AlreadyStarted);
        }
        debug_assert!(
            !self.config.identity.is_empty(),
            "worker identity must not be empty"
        );
        if self.config.identity.is_empty() {
            return Err(ProtocolError::EmptyIdentity.into());
        }
        let links = self.build_links();
        self.launch(links)
    }

    /// Spawn the network thread over `links` and wait for them to come up.
    fn launch(&mut self, links: Links) -> EndpointResult<()> {
        *lock(&self.shared) = SharedState::default();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut senders = HashMap::new();
        let mut inboxes = HashMap::new();
        for target in self.targets() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(target, tx);
            inboxes.insert(target, rx);
        }

        let tick = self.config.heartbeat.interval().max(Duration::from_millis(1));
        let reactor = Reactor::new(
            self.config.identity.clone(),
            links,
            command_rx,
            senders,
            Arc::clone(&self.shared),
            tick,
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let thread = std::thread::Builder::new()
            .name(format!("mdp-worker-{}", self.config.identity))
            .spawn(move || network_thread(reactor, ready_tx, shared))
            .map_err(|e| EndpointError::Runtime(e.to_string()))?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => {
                info!(
                    identity = %self.config.identity,
                    links = ?self.targets(),
                    "Worker endpoint started"
                );
                self.running = Some(Running {
                    commands: command_tx,
                    inboxes,
                    thread: Some(thread),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            // The thread died before reporting.
            Err(_) => {
                let _ = thread.join();
                Err(self.take_failure().unwrap_or_else(|| {
                    EndpointError::Panicked("network thread exited during start".into())
                }))
            }
        }
    }

    fn build_links(&self) -> Links {
        let c = &self.config;
        let timeout = c.connect_timeout();
        Links {
            broker: c.broker_addr.map(|addr| {
                Box::new(BrokerConnection::new(
                    c.identity.clone(),
                    addr,
                    c.heartbeat,
                    timeout,
                )) as Box<dyn Connection>
            }),
            left: c.left_addr.map(|addr| {
                Box::new(PeerConnection::left(c.identity.clone(), addr, timeout)) as Box<dyn Connection>
            }),
            right: c.right_addr.map(|addr| {
                Box::new(PeerConnection::right(c.identity.clone(), addr, timeout))
                    as Box<dyn Connection>
            }),
        }
    }

    fn take_failure(&self) -> Option<EndpointError> {
        lock(&self.shared).failure.take()
    }

    /// Queue a payload for `target`. Does not block.
    ///
    /// For the broker the payload goes out as a REPORT to the client whose
    /// request is oldest; for a neighbour it is relayed as is.
    pub fn send_message(&self, payload: Message, target: CommunicatorId) -> EndpointResult<()> {
        let running = self.running.as_ref().ok_or(EndpointError::Stopped)?;
        if !running.inboxes.contains_key(&target) {
            return Err(EndpointError::NotConnected(target));
        }
        if lock(&self.shared).lost.contains(&target) {
            return Err(EndpointError::Disconnected(target));
        }
        running
            .commands
            .send(AppCommand::Send { target, payload })
            .map_err(|_| self.take_failure().unwrap_or(EndpointError::Stopped))
    }

    /// Block until a payload from `target` arrives.
    pub fn receive_message(&mut self, target: CommunicatorId) -> EndpointResult<Message> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let running = self.running.as_mut().ok_or(EndpointError::Stopped)?;
        let inbox = running
            .inboxes
            .get_mut(&target)
            .ok_or(EndpointError::NotConnected(target))?;
        if let Some(payload) = inbox.blocking_recv() {
            return Ok(payload);
        }

        if lock(&self.shared).lost.contains(&target) {
            return Err(EndpointError::Disconnected(target));
        }
        // The network thread is exiting; let it finish recording why.
        if let Some(thread) = running.thread.take() {
            let _ = thread.join();
        }
        Err(self.take_failure().unwrap_or(EndpointError::Stopped))
    }

    /// Stop the network thread.
    ///
    /// Unless `force` is set the broker is sent DISCONNECT and neighbours BYE
    /// first. With `wait` the call blocks until the thread has exited.
    pub fn stop(&mut self, wait: bool, force: bool) -> EndpointResult<()> {
        let Some(mut running) = self.running.take() else {
            return self.take_failure().map_or(Ok(()), Err);
        };
        let _ = running.commands.send(AppCommand::Stop { force });
        if wait {
            if let Some(thread) = running.thread.take() {
                let _ = thread.join();
            }
        }
        info!(identity = %self.config.identity, wait, force, "Worker endpoint stopping");
        self.take_failure().map_or(Ok(()), Err)
    }
}

impl Drop for WorkerEndpoint {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            // Don't block in drop; the thread closes its links on its own.
            let _ = running.commands.send(AppCommand::Stop { force: false });
        }
    }
}

/// Body of the network thread.
fn network_thread(
    mut reactor: Reactor,
    ready: oneshot::Sender<EndpointResult<()>>,
    shared: Shared,
) {
    let outcome = catch_unwind(AssertUnwindSafe(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = ready.send(Err(EndpointError::Runtime(e.to_string())));
                return;
            }
        };
        runtime.block_on(async move {
            if let Err(e) = reactor.connect().await {
                let _ = ready.send(Err(e));
                return;
            }
            if ready.send(Ok(())).is_err() {
                return;
            }
            let _ = reactor.run().await;
        });
    }));

    if let Err(panic) = outcome {
        let message = panic_message(panic.as_ref());
        error!(panic = %message, "Worker network thread panicked");
        lock(&shared)
            .failure
            .get_or_insert(EndpointError::Panicked(message));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use majordomo_wire::{Incoming, WireError};

    #[test]
    fn test_targets_follow_config() {
        let endpoint = WorkerEndpoint::new(WorkerConfig {
            identity: "W1".into(),
            broker_addr: None,
            right_addr: Some("127.0.0.1:7001".parse().unwrap()),
            ..Default::default()
        });
        assert_eq!(endpoint.targets(), vec![CommunicatorId::RightNeighbour]);
        assert!(!endpoint.is_running());
    }

    #[test]
    fn test_calls_before_start_report_stopped() {
        let mut endpoint = WorkerEndpoint::new(WorkerConfig {
            identity: "W1".into(),
            ..Default::default()
        });
        assert_eq!(
            endpoint.send_message(Message::from("x"), CommunicatorId::Broker),
            Err(EndpointError::Stopped)
        );
        assert_eq!(
            endpoint.receive_message(CommunicatorId::Broker),
            Err(EndpointError::Stopped)
        );
        assert_eq!(endpoint.stop(true, false), Ok(()));
    }

    #[test]
    fn test_start_fails_when_broker_unreachable() {
        // Reserve a port, then free it so nothing is listening there.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut endpoint = WorkerEndpoint::new(WorkerConfig {
            identity: "W1".into(),
            broker_addr: Some(addr),
            connect_timeout_ms: 150,
            ..Default::default()
        });
        let err = endpoint.start().unwrap_err();
        assert!(matches!(err, EndpointError::Wire(_)), "{err:?}");
        assert!(!endpoint.is_running());
    }

    #[test]
    fn test_unconfigured_target_is_rejected() {
        let mut endpoint = WorkerEndpoint::new(WorkerConfig {
            identity: "W1".into(),
            broker_addr: None,
            ..Default::default()
        });
        endpoint.start().unwrap();
        assert_eq!(
            endpoint.send_message(Message::from("x"), CommunicatorId::LeftNeighbour),
            Err(EndpointError::NotConnected(CommunicatorId::LeftNeighbour))
        );
        assert_eq!(endpoint.start(), Err(EndpointError::AlreadyStarted));
        endpoint.stop(true, false).unwrap();
        assert!(!endpoint.is_running());
    }

    /// A broker link whose first read blows up inside the network thread.
    struct ExplodingLink;

    #[async_trait::async_trait]
    impl Connection for ExplodingLink {
        fn comm_id(&self) -> CommunicatorId {
            CommunicatorId::Broker
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn connect(&mut self) -> Result<(), WireError> {
            Ok(())
        }

        async fn send(&mut self, _payload: Message) -> Result<(), WireError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Incoming, WireError> {
            panic!("link exploded");
        }

        async fn close(&mut self, _graceful: bool) -> Result<(), WireError> {
            Ok(())
        }
    }

    #[test]
    fn test_network_thread_panic_surfaces_once() {
        let mut endpoint = WorkerEndpoint::new(WorkerConfig {
            identity: "W1".into(),
            broker_addr: Some("127.0.0.1:9".parse().unwrap()),
            ..Default::default()
        });
        endpoint
            .launch(Links {
                broker: Some(Box::new(ExplodingLink)),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            endpoint.receive_message(CommunicatorId::Broker),
            Err(EndpointError::Panicked("link exploded".into()))
        );
        assert_eq!(
            endpoint.receive_message(CommunicatorId::Broker),
            Err(EndpointError::Stopped)
        );
        assert_eq!(endpoint.stop(true, false), Ok(()));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
