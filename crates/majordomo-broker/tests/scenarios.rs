//! End-to-end broker scenarios over real TCP on localhost.
//!
//! Workers are driven through the worker-side `BrokerConnection` link so each
//! test controls exactly when READY, HEARTBEAT and REPORT go out. Heartbeat
//! timing is shortened through the injected config.

use majordomo_broker::{Broker, BrokerError};
use majordomo_client::Client;
use majordomo_types::config::{BrokerConfig, ClientConfig, HeartbeatConfig};
use majordomo_types::header::{
    ClientCommand, CommunicatorId, WorkerCommand, WorkerCommandHeader, MDPW_WORKER,
};
use majordomo_types::message::Message;
use majordomo_wire::{BrokerConnection, Connection, DealerSocket, Incoming};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expiry of 150ms, for the liveness tests.
fn fast_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        interval_ms: 50,
        liveness: 3,
    }
}

/// Workers that never heartbeat stay registered for the length of a test.
fn relaxed_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        interval_ms: 100,
        liveness: 50,
    }
}

async fn start_broker(
    heartbeat: HeartbeatConfig,
) -> (SocketAddr, JoinHandle<Result<(), BrokerError>>) {
    let broker = Broker::bind(BrokerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        heartbeat,
    })
    .await
    .unwrap();
    let addr = broker.local_addr();
    (addr, tokio::spawn(broker.run()))
}

async fn client(addr: SocketAddr, identity: &str) -> Client {
    Client::connect(&ClientConfig {
        identity: identity.into(),
        broker_addr: addr,
        timeout_ms: 1000,
    })
    .await
    .unwrap()
}

async fn worker(addr: SocketAddr, identity: &str) -> BrokerConnection {
    let mut link = BrokerConnection::new(identity, addr, fast_heartbeat(), Duration::from_secs(2));
    link.connect().await.unwrap();
    link
}

/// Poll the broker until `identity` is registered.
async fn wait_registered(client: &mut Client, identity: &str) {
    for _ in 0..50 {
        if client.check_worker(identity).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("worker {identity} never registered");
}

/// Next application payload on a worker link, skipping heartbeats.
async fn next_delivery(link: &mut BrokerConnection) -> Message {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), link.recv())
            .await
            .expect("no delivery in time")
            .unwrap()
        {
            Incoming::Deliver(payload) => return payload,
            Incoming::Housekeeping => continue,
            Incoming::Disconnect => panic!("unexpected DISCONNECT"),
        }
    }
}

fn worker_frame(command: WorkerCommand, identity: &str) -> Message {
    let header = WorkerCommandHeader::new(command, CommunicatorId::SomeWorker, CommunicatorId::Broker)
        .with_worker_id(identity);
    let mut msg = Message::new();
    msg.push_front(header.to_frame().unwrap());
    msg.push_front(MDPW_WORKER);
    msg
}

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ping_pong_through_broker() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut w1 = worker(addr, "W1").await;
    let mut c = client(addr, "C1").await;
    wait_registered(&mut c, "W1").await;

    c.send_to_worker(Message::from("ping"), "W1").await.unwrap();
    assert_eq!(next_delivery(&mut w1).await, Message::from("ping"));

    w1.send(Message::from("pong")).await.unwrap();
    let reply = c.recv().await.unwrap();
    assert_eq!(reply.command, ClientCommand::Report);
    assert_eq!(reply.from, "W1");
    assert_eq!(reply.payload, Message::from("pong"));
}

#[tokio::test]
async fn test_multi_frame_payload_is_byte_exact() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut w1 = worker(addr, "W1").await;
    let mut c = client(addr, "C1").await;
    wait_registered(&mut c, "W1").await;

    let payload = Message::from_frames([vec![0u8, 1, 2, 255], Vec::new(), vec![b'z'; 4096]]);
    c.send_to_worker(payload.clone(), "W1").await.unwrap();
    assert_eq!(next_delivery(&mut w1).await, payload);
}

#[tokio::test]
async fn test_replies_reach_their_own_clients() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut w1 = worker(addr, "W1").await;
    let mut c1 = client(addr, "C1").await;
    let mut c2 = client(addr, "C2").await;
    wait_registered(&mut c1, "W1").await;

    c1.send_to_worker(Message::from("one"), "W1").await.unwrap();
    assert_eq!(next_delivery(&mut w1).await, Message::from("one"));
    c2.send_to_worker(Message::from("two"), "W1").await.unwrap();
    assert_eq!(next_delivery(&mut w1).await, Message::from("two"));

    w1.send(Message::from("for-one")).await.unwrap();
    w1.send(Message::from("for-two")).await.unwrap();
    assert_eq!(c1.recv().await.unwrap().payload, Message::from("for-one"));
    assert_eq!(c2.recv().await.unwrap().payload, Message::from("for-two"));
}

#[tokio::test]
async fn test_unknown_worker_is_nakked() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut c = client(addr, "C1").await;

    c.send_to_worker(Message::from("ping"), "ghost").await.unwrap();
    let reply = c.recv().await.unwrap();
    assert_eq!(reply.command, ClientCommand::Nak);
    assert_eq!(reply.from, "ghost");
    assert!(!c.check_worker("ghost").await);
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_silent_worker_is_purged_without_notice() {
    let (addr, _broker) = start_broker(fast_heartbeat()).await;
    let mut w1 = worker(addr, "W1").await;
    let mut c = client(addr, "C1").await;
    wait_registered(&mut c, "W1").await;

    // No HEARTBEATs from W1: expiry is 150ms, plus one tick.
    tokio::time::sleep(Duration::from_millis(400)).await;

    c.send_to_worker(Message::from("ping"), "W1").await.unwrap();
    assert_eq!(c.recv().await.unwrap().command, ClientCommand::Nak);

    // Purging is silent: W1 only ever saw HEARTBEATs.
    while let Ok(incoming) = tokio::time::timeout(Duration::from_millis(100), w1.recv()).await {
        assert_eq!(incoming.unwrap(), Incoming::Housekeeping);
    }
}

#[tokio::test]
async fn test_heartbeating_worker_stays_registered() {
    let (addr, _broker) = start_broker(fast_heartbeat()).await;
    let mut w1 = worker(addr, "W1").await;
    let mut c = client(addr, "C1").await;
    wait_registered(&mut c, "W1").await;

    let keepalive = tokio::spawn(async move {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            w1.on_tick().await.unwrap();
            while let Ok(incoming) =
                tokio::time::timeout(Duration::from_millis(1), w1.recv()).await
            {
                assert_eq!(incoming.unwrap(), Incoming::Housekeeping);
            }
        }
        w1
    });
    let _w1 = keepalive.await.unwrap();
    assert!(c.check_worker("W1").await);
}

// ---------------------------------------------------------------------------
// Protocol violations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_ready_resets_registration() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut c = client(addr, "C1").await;
    let mut raw = DealerSocket::connect(addr, "W1", Duration::from_secs(2))
        .await
        .unwrap();

    raw.send(&worker_frame(WorkerCommand::Ready, "W1")).await.unwrap();
    wait_registered(&mut c, "W1").await;
    raw.send(&worker_frame(WorkerCommand::Ready, "W1")).await.unwrap();

    let mut msg = loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), raw.recv())
            .await
            .expect("no DISCONNECT in time")
            .unwrap();
        let header = WorkerCommandHeader::from_frame(msg.get(1).unwrap()).unwrap();
        if header.command == WorkerCommand::Disconnect {
            break msg;
        }
        assert_eq!(header.command, WorkerCommand::Heartbeat);
    };
    assert_eq!(msg.pop_front().unwrap().as_ref(), MDPW_WORKER.as_bytes());
    assert!(!c.check_worker("W1").await);
}

#[tokio::test]
async fn test_heartbeat_from_unknown_worker_gets_disconnect() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut raw = DealerSocket::connect(addr, "W7", Duration::from_secs(2))
        .await
        .unwrap();
    raw.send(&worker_frame(WorkerCommand::Heartbeat, "W7"))
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), raw.recv())
        .await
        .unwrap()
        .unwrap();
    let header = WorkerCommandHeader::from_frame(msg.get(1).unwrap()).unwrap();
    assert_eq!(header.command, WorkerCommand::Disconnect);
}

#[tokio::test]
async fn test_short_message_does_not_disturb_broker() {
    let (addr, _broker) = start_broker(relaxed_heartbeat()).await;
    let mut raw = DealerSocket::connect(addr, "junk", Duration::from_secs(2))
        .await
        .unwrap();
    raw.send(&Message::from(MDPW_WORKER)).await.unwrap();

    let mut c = client(addr, "C1").await;
    let _w1 = worker(addr, "W1").await;
    wait_registered(&mut c, "W1").await;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_terminate_request_stops_broker() {
    let (addr, broker) = start_broker(relaxed_heartbeat()).await;
    let mut c = client(addr, "C1").await;
    assert!(c.request_broker_termination().await);
    tokio::time::timeout(Duration::from_secs(2), broker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_handle_stops_broker() {
    let broker = Broker::bind(BrokerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        heartbeat: fast_heartbeat(),
    })
    .await
    .unwrap();
    let handle = broker.shutdown_handle();
    let running = tokio::spawn(broker.run());
    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let first = Broker::bind(BrokerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        heartbeat: fast_heartbeat(),
    })
    .await
    .unwrap();
    let taken = first.local_addr();
    let err = Broker::bind(BrokerConfig {
        bind_addr: taken,
        heartbeat: fast_heartbeat(),
    })
    .await
    .err()
    .unwrap();
    assert!(matches!(err, BrokerError::Bind { addr, .. } if addr == taken));
}
