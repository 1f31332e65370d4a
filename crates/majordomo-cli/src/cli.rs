//! Clap CLI definitions for majordomo.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  majordomo broker --bind 127.0.0.1:5555         Run a broker
  majordomo worker --identity W1                 Echo worker registered with the broker
  majordomo worker --identity W1 --right 127.0.0.1:7001
                                                 Forward requests to a right neighbour
  majordomo worker --identity W2 --no-broker --left 127.0.0.1:7001
                                                 Answer requests relayed by the left neighbour
  majordomo request W1 hello world               Send a two-frame request to W1
  majordomo check W1                             Is W1 registered?
  majordomo terminate                            Shut the broker down";

/// Majordomo: broker-mediated request/reply between clients and named workers.
#[derive(Parser)]
#[command(name = "majordomo", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.majordomo/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a broker in the foreground until Ctrl+C or a terminate request.
    Broker {
        /// Address to bind.
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Heartbeat interval in milliseconds.
        #[arg(long)]
        heartbeat_ms: Option<u64>,
        /// Missed heartbeats before a worker is purged.
        #[arg(long)]
        liveness: Option<u32>,
    },
    /// Run an echo worker.
    Worker {
        /// Worker identity (routing identity at the broker).
        #[arg(long)]
        identity: Option<String>,
        /// Broker address.
        #[arg(long, conflicts_with = "no_broker")]
        broker: Option<SocketAddr>,
        /// Run without a broker link; requests come from the left neighbour.
        #[arg(long)]
        no_broker: bool,
        /// Left neighbour address (this worker connects).
        #[arg(long)]
        left: Option<SocketAddr>,
        /// Right neighbour address (this worker listens).
        #[arg(long)]
        right: Option<SocketAddr>,
        /// Heartbeat interval in milliseconds.
        #[arg(long)]
        heartbeat_ms: Option<u64>,
    },
    /// Send one request to a worker and print the reply.
    Request {
        /// Target worker identity.
        worker: String,
        /// Payload frames.
        payload: Vec<String>,
        #[command(flatten)]
        client: ClientArgs,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Ask the broker whether a worker is registered.
    Check {
        /// Worker identity.
        worker: String,
        #[command(flatten)]
        client: ClientArgs,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Ask the broker to shut down.
    Terminate {
        #[command(flatten)]
        client: ClientArgs,
    },
}

/// Connection flags shared by the client commands.
#[derive(clap::Args, Clone, Default)]
pub struct ClientArgs {
    /// Broker address.
    #[arg(long)]
    pub broker: Option<SocketAddr>,
    /// Reply timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Client identity (default: assigned by the broker).
    #[arg(long)]
    pub identity: Option<String>,
}
