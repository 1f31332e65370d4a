//! Timing and role configuration.
//!
//! Timing lives in an explicit [`HeartbeatConfig`] that is injected into the
//! broker and the worker endpoint at construction, so tests can shorten the
//! heartbeat without touching process-wide state.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default heartbeat interval (milliseconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2500;

/// Default liveness multiplier; 3-5 is reasonable.
pub const DEFAULT_HEARTBEAT_LIVENESS: u32 = 3;

/// Default port the broker listens on.
pub const DEFAULT_BROKER_PORT: u16 = 5555;

/// Heartbeat timing shared by broker and workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between heartbeats (milliseconds).
    pub interval_ms: u64,
    /// How many missed intervals make a counterpart dead.
    pub liveness: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            liveness: DEFAULT_HEARTBEAT_LIVENESS,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// interval × liveness.
    pub fn expiry(&self) -> Duration {
        self.interval() * self.liveness.max(1)
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address the broker socket binds to.
    pub bind_addr: SocketAddr,
    pub heartbeat: HeartbeatConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_BROKER_PORT)),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Worker endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker identity; also the routing identity announced to the broker.
    pub identity: String,
    /// Broker to register with. `None` runs a peer-only worker.
    pub broker_addr: Option<SocketAddr>,
    /// Left neighbour: this side initiates the link (connects).
    pub left_addr: Option<SocketAddr>,
    /// Right neighbour: this side accepts the link (binds).
    pub right_addr: Option<SocketAddr>,
    /// Upper bound for establishing every link in `start()` (milliseconds).
    pub connect_timeout_ms: u64,
    pub heartbeat: HeartbeatConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            broker_addr: Some(SocketAddr::from(([127, 0, 0, 1], DEFAULT_BROKER_PORT))),
            left_addr: None,
            right_addr: None,
            connect_timeout_ms: 10_000,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Client stub settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identity; empty lets the broker assign one.
    pub identity: String,
    pub broker_addr: SocketAddr,
    /// Bound on every receive and administrative call (milliseconds).
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            broker_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_BROKER_PORT)),
            timeout_ms: 2500,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration file (`~/.majordomo/config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MajordomoConfig {
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub client: ClientConfig,
}
