//! `majordomo broker`.

use crate::ui;
use majordomo_broker::Broker;
use majordomo_types::config::BrokerConfig;

/// Run a broker until Ctrl+C or a client's terminate request.
pub fn cmd_broker(config: BrokerConfig) {
    let rt = super::runtime();
    let heartbeat = config.heartbeat;
    rt.block_on(async move {
        let broker = match Broker::bind(config).await {
            Ok(b) => b,
            Err(e) => {
                ui::fail(&e.to_string());
                ui::note("Is another broker already listening on that address?");
                // Nothing can run without the listen socket.
                std::process::exit(2);
            }
        };

        ui::heading("Majordomo broker");
        ui::field("Listening", &broker.local_addr().to_string(), ui::Tone::Plain);
        ui::field(
            "Heartbeat",
            &format!("{}ms x {}", heartbeat.interval_ms, heartbeat.liveness),
            ui::Tone::Plain,
        );
        ui::note("Press Ctrl+C to stop.");

        let shutdown = broker.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.shutdown();
            }
        });

        match broker.run().await {
            Ok(()) => ui::done("Broker stopped"),
            Err(e) => {
                ui::fail(&format!("Broker failed: {e}"));
                std::process::exit(1);
            }
        }
    });
}
