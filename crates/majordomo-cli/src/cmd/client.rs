//! `majordomo request`, `check` and `terminate`.

use crate::ui;
use majordomo_client::{Client, ClientError};
use majordomo_types::config::ClientConfig;
use majordomo_types::header::ClientCommand;
use majordomo_types::message::Message;

fn connect(rt: &tokio::runtime::Runtime, config: &ClientConfig) -> Client {
    match rt.block_on(Client::connect(config)) {
        Ok(client) => client,
        Err(e) => {
            ui::fail(&format!("Cannot reach broker at {}: {e}", config.broker_addr));
            ui::note("Start one with `majordomo broker`.");
            std::process::exit(1);
        }
    }
}

pub fn cmd_request(config: ClientConfig, worker: &str, payload: Vec<String>, json: bool) {
    let rt = super::runtime();
    let mut client = connect(&rt, &config);
    let request: Message = payload.into_iter().collect();

    let reply = match rt.block_on(client.request(request, worker)) {
        Ok(reply) => reply,
        Err(ClientError::Timeout { timeout_ms }) => {
            ui::fail(&format!("No reply from {worker} within {timeout_ms}ms"));
            std::process::exit(1);
        }
        Err(e) => {
            ui::fail(&format!("Request failed: {e}"));
            std::process::exit(1);
        }
    };

    let frames: Vec<String> = reply
        .payload
        .frames()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    if json {
        let out = serde_json::json!({
            "command": reply.command.to_string(),
            "worker": reply.from,
            "frames": frames,
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    } else if reply.command == ClientCommand::Nak {
        let why = format!("NAK ({} is not registered)", reply.from);
        ui::field("Reply", &why, ui::Tone::Warn);
    } else {
        ui::field("Reply", &reply.command.to_string(), ui::Tone::Good);
        ui::field("Worker", &reply.from, ui::Tone::Plain);
        for (i, frame) in frames.iter().enumerate() {
            ui::field(&format!("Frame {i}"), frame, ui::Tone::Plain);
        }
    }
    if reply.command == ClientCommand::Nak {
        std::process::exit(1);
    }
}

pub fn cmd_check(config: ClientConfig, worker: &str, json: bool) {
    let rt = super::runtime();
    let mut client = connect(&rt, &config);
    let registered = rt.block_on(client.check_worker(worker));
    if json {
        let out = serde_json::json!({ "worker": worker, "registered": registered });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    } else if registered {
        ui::field(worker, "registered", ui::Tone::Good);
    } else {
        ui::field(worker, "not registered", ui::Tone::Warn);
    }
    if !registered {
        std::process::exit(1);
    }
}

pub fn cmd_terminate(config: ClientConfig) {
    let rt = super::runtime();
    let mut client = connect(&rt, &config);
    if rt.block_on(client.request_broker_termination()) {
        ui::done("Broker acknowledged termination");
    } else {
        ui::fail("Broker did not acknowledge termination");
        std::process::exit(1);
    }
}
