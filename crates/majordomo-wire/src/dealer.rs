//! DealerSocket: a single framed TCP link that announces an identity.
//!
//! The connecting side sends a one-frame greeting carrying its identity right
//! after the TCP handshake; the router on the other end uses it as the routing
//! identity. Inbound messages are read by a background task and handed over a
//! channel, which makes [`DealerSocket::recv`] safe to use inside `select!`.

use crate::codec::{read_message, write_message, WireError};
use majordomo_types::message::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Longest pause between two connect attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(500);

pub struct DealerSocket {
    /// Identity of the remote side, when it announced one.
    remote_identity: String,
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Result<Message, WireError>>,
    reader_task: JoinHandle<()>,
}

impl DealerSocket {
    /// Connect to `addr`, retrying until `timeout` elapses, then send the greeting.
    pub async fn connect(
        addr: SocketAddr,
        identity: &str,
        timeout: Duration,
    ) -> Result<Self, WireError> {
        let stream = connect_with_retry(addr, timeout).await?;
        let mut socket = Self::from_stream(stream, String::new())?;
        socket.send(&Message::from(identity)).await?;
        debug!(%addr, identity, "Dealer connected");
        Ok(socket)
    }

    /// Accept one connection on `listener` and read its greeting.
    pub async fn accept(listener: &TcpListener, timeout: Duration) -> Result<Self, WireError> {
        let deadline = Instant::now() + timeout;
        let (stream, addr) = tokio::time::timeout_at(deadline, listener.accept())
            .await
            .map_err(|_| WireError::HandshakeFailed("no connection before timeout".into()))??;
        let mut socket = Self::from_stream(stream, String::new())?;
        let greeting = tokio::time::timeout_at(deadline, socket.recv())
            .await
            .map_err(|_| WireError::HandshakeFailed("no greeting before timeout".into()))??;
        socket.remote_identity = greeting.get_str(0).unwrap_or_default();
        debug!(%addr, remote = %socket.remote_identity, "Dealer accepted");
        Ok(socket)
    }

    fn from_stream(stream: TcpStream, remote_identity: String) -> Result<Self, WireError> {
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_message(&mut reader).await {
                    Ok(msg) => {
                        if tx.send(Ok(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });
        Ok(Self {
            remote_identity,
            writer,
            inbound,
            reader_task,
        })
    }

    pub fn remote_identity(&self) -> &str {
        &self.remote_identity
    }

    /// Send one message.
    pub async fn send(&mut self, msg: &Message) -> Result<(), WireError> {
        write_message(&mut self.writer, msg).await
    }

    /// Receive one message. Cancel-safe.
    pub async fn recv(&mut self) -> Result<Message, WireError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(WireError::ConnectionClosed),
        }
    }

    /// Shut down the write half; the remote side observes EOF.
    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Connect with exponential backoff until `timeout` elapses.
///
/// The remote side may not be listening yet (a neighbour still starting), so
/// refused connections are retried rather than reported immediately.
async fn connect_with_retry(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, WireError> {
    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(20);
    loop {
        match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "Connect attempt failed, retrying");
            }
            Err(_) => break,
        }
        if Instant::now() + backoff >= deadline {
            break;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
    Err(WireError::ConnectTimeout {
        addr,
        timeout_ms: timeout.as_millis() as u64,
    })
}
