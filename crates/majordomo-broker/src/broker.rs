//! Broker event loop.
//!
//! One task owns the router socket and the [`Dispatcher`]. Each iteration
//! waits for either an inbound message or the next heartbeat deadline, so a
//! quiet socket never starves liveness checks.

use crate::dispatch::Dispatcher;
use crate::error::{BrokerError, BrokerResult};
use majordomo_types::config::{BrokerConfig, HeartbeatConfig};
use majordomo_wire::RouterSocket;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// How long queued replies may take to flush once the loop has stopped.
const LINGER: Duration = Duration::from_millis(100);

/// Stops a running broker from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Broker {
    socket: RouterSocket,
    dispatcher: Dispatcher,
    heartbeat: HeartbeatConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Broker {
    /// Bind the broker's listening endpoint.
    pub async fn bind(config: BrokerConfig) -> BrokerResult<Self> {
        let socket = RouterSocket::bind(config.bind_addr)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        info!(
            addr = %socket.local_addr(),
            interval_ms = config.heartbeat.interval_ms,
            liveness = config.heartbeat.liveness,
            "Broker is active"
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            socket,
            dispatcher: Dispatcher::new(config.heartbeat),
            heartbeat: config.heartbeat,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Run the event loop until a client requests termination or the
    /// shutdown handle fires.
    pub async fn run(mut self) -> BrokerResult<()> {
        let mut heartbeat_at = Instant::now() + self.heartbeat.interval();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    info!("Broker shutting down");
                    break;
                }
                inbound = self.socket.recv() => {
                    let Some(msg) = inbound else {
                        return Err(BrokerError::SocketClosed);
                    };
                    for reply in self.dispatcher.handle(msg, Instant::now()) {
                        self.socket.send(reply);
                    }
                    if self.dispatcher.terminate_requested() {
                        info!("Broker terminated by client request");
                        break;
                    }
                }
                _ = tokio::time::sleep_until(heartbeat_at) => {}
            }

            let now = Instant::now();
            if now >= heartbeat_at {
                let outgoing = self.dispatcher.tick(now);
                debug!(
                    workers = self.dispatcher.registry().len(),
                    heartbeats = outgoing.len(),
                    "Heartbeat tick"
                );
                for msg in outgoing {
                    self.socket.send(msg);
                }
                heartbeat_at = now + self.heartbeat.interval();
            }
        }
        tokio::time::sleep(LINGER).await;
        Ok(())
    }
}
