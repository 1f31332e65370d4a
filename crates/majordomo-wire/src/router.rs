//! RouterSocket: the broker's single addressed listening socket.
//!
//! Every accepted connection is registered under the identity it announced in
//! its greeting. Inbound messages are surfaced with that routing identity as
//! the first frame; outbound messages are routed by popping their first frame.
//! Routing to a specific client or worker therefore needs no per-peer handle,
//! only the right routing frame.

use crate::codec::{read_message, write_message, WireError};
use majordomo_types::message::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// How long a fresh connection may take to send its greeting.
const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

struct Route {
    conn_id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

type RouteTable = Arc<RwLock<HashMap<String, Route>>>;

pub struct RouterSocket {
    local_addr: SocketAddr,
    routes: RouteTable,
    inbound: mpsc::UnboundedReceiver<Message>,
    shutdown_tx: watch::Sender<bool>,
}

impl RouterSocket {
    /// Bind the listening endpoint and start accepting connections.
    pub async fn bind(addr: SocketAddr) -> Result<Self, WireError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let routes: RouteTable = Arc::new(RwLock::new(HashMap::new()));
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&routes),
            inbound_tx,
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            routes,
            inbound,
            shutdown_tx,
        })
    }

    /// The actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive one message, prefixed with the sender's routing identity.
    ///
    /// Cancel-safe. Returns `None` once the socket has shut down.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }

    /// Route a message by its first frame.
    ///
    /// Returns `false` when the routing identity is unknown; like any
    /// addressed socket, the message is then dropped.
    pub fn send(&self, mut msg: Message) -> bool {
        let Some(routing_id) = msg.pop_front() else {
            debug!("Router: dropping empty message");
            return false;
        };
        let routing_id = String::from_utf8_lossy(&routing_id).into_owned();
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        match routes.get(&routing_id) {
            Some(route) => route.tx.send(msg).is_ok(),
            None => {
                debug!(routing_id = %routing_id, "Router: no such peer, dropping message");
                false
            }
        }
    }

    /// Whether a connection is currently registered under `routing_id`.
    pub fn is_connected(&self, routing_id: &str) -> bool {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.contains_key(routing_id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.len()
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    routes: RouteTable,
    inbound_tx: mpsc::UnboundedSender<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let next_conn_id = AtomicU64::new(1);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        conn_id,
                        Arc::clone(&routes),
                        inbound_tx.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    error!("Router: accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
    debug!("Router: accept loop stopped");
}

/// Register one connection and pump its inbound messages until it closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    routes: RouteTable,
    inbound_tx: mpsc::UnboundedSender<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let greeting = match tokio::time::timeout(GREETING_TIMEOUT, read_message(&mut reader)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "Router: connection closed before greeting");
            return;
        }
        Err(_) => {
            debug!(%addr, "Router: no greeting, closing connection");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let identity = {
        let mut table = routes.write().unwrap_or_else(|e| e.into_inner());
        let announced = greeting.get_str(0).unwrap_or_default();
        let identity = if announced.is_empty() || table.contains_key(&announced) {
            uuid::Uuid::new_v4().to_string()
        } else {
            announced
        };
        table.insert(identity.clone(), Route { conn_id, tx });
        identity
    };
    info!(%addr, identity = %identity, "Router: connection registered");

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                debug!(error = %e, "Router: write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            read = read_message(&mut reader) => match read {
                Ok(mut msg) => {
                    msg.push_front(identity.clone());
                    if inbound_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(WireError::ConnectionClosed) => break,
                Err(e) => {
                    debug!(identity = %identity, error = %e, "Router: read failed");
                    break;
                }
            }
        }
    }

    {
        let mut table = routes.write().unwrap_or_else(|e| e.into_inner());
        if table.get(&identity).is_some_and(|r| r.conn_id == conn_id) {
            table.remove(&identity);
        }
    }
    // Dropping the route closed the writer's channel; let it flush what is queued.
    let _ = writer_task.await;
    info!(identity = %identity, "Router: connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dealer::DealerSocket;

    async fn wait_for_route(router: &RouterSocket, id: &str) {
        for _ in 0..100 {
            if router.is_connected(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("route {id} never registered");
    }

    #[tokio::test]
    async fn test_inbound_is_tagged_with_identity() {
        let mut router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut dealer = DealerSocket::connect(router.local_addr(), "W1", Duration::from_secs(2))
            .await
            .unwrap();

        dealer.send(&Message::from("ping")).await.unwrap();
        let msg = router.recv().await.unwrap();
        assert_eq!(msg.get_str(0).unwrap(), "W1");
        assert_eq!(msg.get_str(1).unwrap(), "ping");
    }

    #[tokio::test]
    async fn test_outbound_routed_by_first_frame() {
        let router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut w1 = DealerSocket::connect(router.local_addr(), "W1", Duration::from_secs(2))
            .await
            .unwrap();
        let mut w2 = DealerSocket::connect(router.local_addr(), "W2", Duration::from_secs(2))
            .await
            .unwrap();
        wait_for_route(&router, "W1").await;
        wait_for_route(&router, "W2").await;

        assert!(router.send(Message::from_frames(["W2", "for-w2"])));
        assert!(router.send(Message::from_frames(["W1", "for-w1"])));
        assert!(!router.send(Message::from_frames(["nobody", "lost"])));

        assert_eq!(w1.recv().await.unwrap(), Message::from("for-w1"));
        assert_eq!(w2.recv().await.unwrap(), Message::from("for-w2"));
    }

    #[tokio::test]
    async fn test_empty_and_duplicate_identities_get_generated_ids() {
        let mut router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut first = DealerSocket::connect(router.local_addr(), "dup", Duration::from_secs(2))
            .await
            .unwrap();
        wait_for_route(&router, "dup").await;
        let mut second = DealerSocket::connect(router.local_addr(), "dup", Duration::from_secs(2))
            .await
            .unwrap();
        let mut anonymous = DealerSocket::connect(router.local_addr(), "", Duration::from_secs(2))
            .await
            .unwrap();

        first.send(&Message::from("a")).await.unwrap();
        let from_first = router.recv().await.unwrap();
        assert_eq!(from_first.get_str(0).unwrap(), "dup");

        second.send(&Message::from("b")).await.unwrap();
        let from_second = router.recv().await.unwrap();
        assert_ne!(from_second.get_str(0).unwrap(), "dup");

        anonymous.send(&Message::from("c")).await.unwrap();
        let from_anonymous = router.recv().await.unwrap();
        assert!(!from_anonymous.get_str(0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_is_unregistered() {
        let router = RouterSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut dealer = DealerSocket::connect(router.local_addr(), "W1", Duration::from_secs(2))
            .await
            .unwrap();
        wait_for_route(&router, "W1").await;
        dealer.shutdown().await.unwrap();
        drop(dealer);

        for _ in 0..100 {
            if !router.is_connected("W1") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("route W1 was never removed");
    }
}
