//! `majordomo worker`: an echo worker.
//!
//! Requests come from the broker, or from the left neighbour when the worker
//! runs without a broker. With a right neighbour configured each request is
//! passed on to it and its answer is returned instead of the echo.

use crate::ui;
use majordomo_types::config::WorkerConfig;
use majordomo_types::header::CommunicatorId;
use majordomo_worker::{EndpointResult, WorkerEndpoint};
use tracing::info;

pub fn cmd_worker(config: WorkerConfig) {
    let Some(upstream) = upstream_of(&config) else {
        ui::fail("A worker needs a broker or a left neighbour to take requests from");
        ui::note("Pass --broker <addr> or --left <addr>.");
        std::process::exit(1);
    };
    let downstream = config.right_addr.map(|_| CommunicatorId::RightNeighbour);

    ui::heading("Majordomo worker");
    ui::field("Identity", &config.identity, ui::Tone::Plain);
    if let Some(addr) = config.broker_addr {
        ui::field("Broker", &addr.to_string(), ui::Tone::Plain);
    }
    if let Some(addr) = config.left_addr {
        ui::field("Left", &addr.to_string(), ui::Tone::Plain);
    }
    if let Some(addr) = config.right_addr {
        ui::field("Right", &addr.to_string(), ui::Tone::Plain);
    }

    let mut endpoint = WorkerEndpoint::new(config);
    if let Err(e) = endpoint.start() {
        ui::fail(&format!("Failed to start worker: {e}"));
        std::process::exit(1);
    }
    ui::field("Status", "serving", ui::Tone::Good);

    if let Err(e) = serve(&mut endpoint, upstream, downstream) {
        ui::fail(&format!("Worker stopped: {e}"));
        let _ = endpoint.stop(true, true);
        std::process::exit(1);
    }
}

fn upstream_of(config: &WorkerConfig) -> Option<CommunicatorId> {
    if config.broker_addr.is_some() {
        Some(CommunicatorId::Broker)
    } else if config.left_addr.is_some() {
        Some(CommunicatorId::LeftNeighbour)
    } else {
        None
    }
}

/// Answer requests from `upstream` until the endpoint fails.
fn serve(
    endpoint: &mut WorkerEndpoint,
    upstream: CommunicatorId,
    downstream: Option<CommunicatorId>,
) -> EndpointResult<()> {
    loop {
        let request = endpoint.receive_message(upstream)?;
        info!(from = %upstream, frames = request.parts(), "Request");
        let reply = match downstream {
            Some(next) => {
                endpoint.send_message(request, next)?;
                endpoint.receive_message(next)?
            }
            None => request,
        };
        endpoint.send_message(reply, upstream)?;
    }
}
