//! `majordomo`: run a broker, an echo worker, or one-shot client calls.

mod cli;
mod cmd;
mod config;
mod ui;

use clap::Parser;
use cli::{ClientArgs, Cli, Commands};
use majordomo_types::config::{ClientConfig, MajordomoConfig};

fn init_tracing_stderr(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Apply the shared client flags on top of the loaded settings.
fn client_config(base: ClientConfig, args: ClientArgs) -> ClientConfig {
    let mut config = base;
    if let Some(addr) = args.broker {
        config.broker_addr = addr;
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = ms;
    }
    if let Some(identity) = args.identity {
        config.identity = identity;
    }
    config
}

fn run(command: Commands, config: MajordomoConfig) {
    match command {
        Commands::Broker {
            bind,
            heartbeat_ms,
            liveness,
        } => {
            let mut broker = config.broker;
            if let Some(addr) = bind {
                broker.bind_addr = addr;
            }
            if let Some(ms) = heartbeat_ms {
                broker.heartbeat.interval_ms = ms;
            }
            if let Some(n) = liveness {
                broker.heartbeat.liveness = n;
            }
            cmd::broker::cmd_broker(broker);
        }
        Commands::Worker {
            identity,
            broker,
            no_broker,
            left,
            right,
            heartbeat_ms,
        } => {
            let mut worker = config.worker;
            if let Some(id) = identity {
                worker.identity = id;
            }
            if no_broker {
                worker.broker_addr = None;
            } else if broker.is_some() {
                worker.broker_addr = broker;
            }
            if left.is_some() {
                worker.left_addr = left;
            }
            if right.is_some() {
                worker.right_addr = right;
            }
            if let Some(ms) = heartbeat_ms {
                worker.heartbeat.interval_ms = ms;
            }
            if worker.identity.is_empty() {
                ui::fail("A worker needs an identity");
                ui::note("Pass --identity <name> or set [worker] identity in the config file.");
                std::process::exit(1);
            }
            cmd::worker::cmd_worker(worker);
        }
        Commands::Request {
            worker,
            payload,
            client,
            json,
        } => cmd::client::cmd_request(client_config(config.client, client), &worker, payload, json),
        Commands::Check {
            worker,
            client,
            json,
        } => cmd::client::cmd_check(client_config(config.client, client), &worker, json),
        Commands::Terminate { client } => {
            cmd::client::cmd_terminate(client_config(config.client, client))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr(cli.verbose);
    let config = config::load_config(cli.config.as_deref());
    run(cli.command, config);
}
