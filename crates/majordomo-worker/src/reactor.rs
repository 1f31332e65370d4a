//! The network thread's event loop.
//!
//! One `select!` multiplexes the broker link, both neighbour links, the
//! application's command channel and the heartbeat tick. Inbound payloads are
//! pushed into the application's per-link inboxes.

use crate::error::{EndpointError, EndpointResult};
use majordomo_types::header::CommunicatorId;
use majordomo_types::message::Message;
use majordomo_wire::{Connection, Incoming, WireError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Requests from the application thread.
#[derive(Debug)]
pub(crate) enum AppCommand {
    Send {
        target: CommunicatorId,
        payload: Message,
    },
    Stop {
        force: bool,
    },
}

/// State shared between the application thread and the network thread.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    /// The first failure of the network thread, taken once by the application.
    pub failure: Option<EndpointError>,
    /// Links the counterpart closed while the endpoint kept running.
    pub lost: HashSet<CommunicatorId>,
}

pub(crate) type Shared = Arc<Mutex<SharedState>>;

pub(crate) fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) type Link = Option<Box<dyn Connection>>;

/// The links a worker maintains; absent ones are `None`.
#[derive(Default)]
pub(crate) struct Links {
    pub broker: Link,
    pub left: Link,
    pub right: Link,
}

pub(crate) struct Reactor {
    identity: String,
    links: Links,
    commands: mpsc::UnboundedReceiver<AppCommand>,
    inboxes: HashMap<CommunicatorId, mpsc::UnboundedSender<Message>>,
    shared: Shared,
    tick: Duration,
}

impl Reactor {
    pub(crate) fn new(
        identity: String,
        links: Links,
        commands: mpsc::UnboundedReceiver<AppCommand>,
        inboxes: HashMap<CommunicatorId, mpsc::UnboundedSender<Message>>,
        shared: Shared,
        tick: Duration,
    ) -> Self {
        Self {
            identity,
            links,
            commands,
            inboxes,
            shared,
            tick,
        }
    }

    /// Establish every configured link concurrently.
    ///
    /// Neighbours may be starting at the same moment, so the initiating and
    /// accepting sides must be able to wait on each other.
    pub(crate) async fn connect(&mut self) -> EndpointResult<()> {
        let (broker, left, right) = tokio::join!(
            connect_link(&mut self.links.broker),
            connect_link(&mut self.links.left),
            connect_link(&mut self.links.right),
        );
        let result = broker.and(left).and(right);
        if result.is_err() {
            // Unregister from the broker if only the neighbours failed.
            self.close_all(true).await;
        }
        result
    }

    /// Run until stopped or failed. A failure is recorded in the shared slot
    /// before the inboxes close, so the application sees it on wake-up.
    pub(crate) async fn run(mut self) -> EndpointResult<()> {
        let result = self.event_loop().await;
        match &result {
            Ok(()) => info!(identity = %self.identity, "Endpoint stopped"),
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Endpoint failed");
                self.close_all(false).await;
                lock(&self.shared).failure.get_or_insert_with(|| e.clone());
            }
        }
        result
    }

    async fn event_loop(&mut self) -> EndpointResult<()> {
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(AppCommand::Send { target, payload }) => self.forward(target, payload).await?,
                    Some(AppCommand::Stop { force }) => {
                        self.close_all(!force).await;
                        return Ok(());
                    }
                    // Endpoint dropped without stop().
                    None => {
                        self.close_all(true).await;
                        return Ok(());
                    }
                },
                incoming = recv_from(&mut self.links.broker) => {
                    self.on_incoming(CommunicatorId::Broker, incoming)?;
                }
                incoming = recv_from(&mut self.links.left) => {
                    self.on_incoming(CommunicatorId::LeftNeighbour, incoming)?;
                }
                incoming = recv_from(&mut self.links.right) => {
                    self.on_incoming(CommunicatorId::RightNeighbour, incoming)?;
                }
                _ = tick.tick() => {
                    if let Some(broker) = self.links.broker.as_mut() {
                        broker.on_tick().await?;
                    }
                }
            }
        }
    }

    fn link_mut(&mut self, target: CommunicatorId) -> Option<&mut Link> {
        match target {
            CommunicatorId::Broker => Some(&mut self.links.broker),
            CommunicatorId::LeftNeighbour => Some(&mut self.links.left),
            CommunicatorId::RightNeighbour => Some(&mut self.links.right),
            _ => None,
        }
    }

    async fn forward(&mut self, target: CommunicatorId, payload: Message) -> EndpointResult<()> {
        let identity = self.identity.clone();
        match self.link_mut(target).and_then(|link| link.as_mut()) {
            Some(link) => {
                debug!(identity = %identity, %target, frames = payload.parts(), "Forwarding payload");
                link.send(payload).await?;
            }
            None => warn!(identity = %identity, %target, "No live link, dropping payload"),
        }
        Ok(())
    }

    fn on_incoming(
        &mut self,
        source: CommunicatorId,
        incoming: Result<Incoming, WireError>,
    ) -> EndpointResult<()> {
        match incoming {
            Ok(Incoming::Deliver(payload)) => {
                let delivered = self
                    .inboxes
                    .get(&source)
                    .is_some_and(|inbox| inbox.send(payload).is_ok());
                if !delivered {
                    debug!(identity = %self.identity, %source, "Application inbox closed, dropping payload");
                }
                Ok(())
            }
            Ok(Incoming::Housekeeping) => Ok(()),
            Ok(Incoming::Disconnect) if source == CommunicatorId::Broker => {
                Err(EndpointError::Disconnected(source))
            }
            Ok(Incoming::Disconnect) => {
                self.drop_link(source);
                Ok(())
            }
            Err(WireError::ConnectionClosed) if source == CommunicatorId::Broker => {
                Err(EndpointError::Disconnected(source))
            }
            Err(WireError::ConnectionClosed) => {
                warn!(identity = %self.identity, %source, "Neighbour link closed without BYE");
                self.drop_link(source);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forget a neighbour link; the application's inbox for it closes.
    fn drop_link(&mut self, source: CommunicatorId) {
        if let Some(link) = self.link_mut(source) {
            *link = None;
        }
        lock(&self.shared).lost.insert(source);
        self.inboxes.remove(&source);
        info!(identity = %self.identity, %source, "Neighbour link dropped");
    }

    async fn close_all(&mut self, graceful: bool) {
        let links = &mut self.links;
        for link in [&mut links.broker, &mut links.left, &mut links.right] {
            if let Some(mut conn) = link.take() {
                if let Err(e) = conn.close(graceful).await {
                    debug!(link = %conn.comm_id(), error = %e, "Error while closing link");
                }
            }
        }
    }
}

async fn connect_link(link: &mut Link) -> EndpointResult<()> {
    match link.as_mut() {
        Some(conn) => conn.connect().await.map_err(EndpointError::from),
        None => Ok(()),
    }
}

/// Receive from a link, or wait forever when the link is absent.
async fn recv_from(link: &mut Link) -> Result<Incoming, WireError> {
    match link.as_mut() {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}
