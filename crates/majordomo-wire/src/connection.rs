//! The contract shared by every link a worker endpoint maintains.

use crate::codec::WireError;
use async_trait::async_trait;
use majordomo_types::header::CommunicatorId;
use majordomo_types::message::Message;

/// What an inbound wire message means to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Application payload to hand to the application thread.
    Deliver(Message),
    /// Link housekeeping (heartbeat, greeting, dropped junk); nothing to deliver.
    Housekeeping,
    /// The counterpart closed the link on purpose.
    Disconnect,
}

/// One link between a worker and a counterpart (the broker or a neighbour).
///
/// Implementations own their socket and their protocol framing; callers only
/// see application payloads going out and [`Incoming`] events coming in.
#[async_trait]
pub trait Connection: Send {
    /// Which counterpart this link talks to.
    fn comm_id(&self) -> CommunicatorId;

    fn is_connected(&self) -> bool;

    /// Establish the link, including any handshake.
    async fn connect(&mut self) -> Result<(), WireError>;

    /// Wrap an application payload in this link's envelope and send it.
    async fn send(&mut self, payload: Message) -> Result<(), WireError>;

    /// Wait for and interpret the next inbound message.
    ///
    /// Must be cancel-safe: the endpoint reactor polls it inside `select!`.
    async fn recv(&mut self) -> Result<Incoming, WireError>;

    /// Called once per heartbeat interval by the reactor.
    async fn on_tick(&mut self) -> Result<(), WireError> {
        Ok(())
    }

    /// Close the link. `graceful` sends the counterpart a goodbye first.
    async fn close(&mut self, graceful: bool) -> Result<(), WireError>;
}
