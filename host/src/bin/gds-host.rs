//! Headless host binary.
//!
//! Connects a printer and a reel controller to in-memory simulators, runs
//! the startup sequence once and then idles until Ctrl+C.

use gds::command::{RegionDefinition, TemplateDefinition, TicketData};
use gds_host::{Devices, HostConfig, devices, load_dotenv};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv();
    let config = HostConfig::load();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dotenv {
        Some(path) => tracing::info!("Loaded .env from: {path}"),
        None => tracing::info!("No .env file found, using system environment variables"),
    }
    tracing::info!(?config, "Starting GDS host (simulated devices)");

    let shutdown = CancellationToken::new();
    let devices = devices::start_simulated(&config, &shutdown).await?;

    startup(&devices, &config).await;

    tracing::info!("GDS host running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    shutdown.cancel();
    devices.shutdown().await;
    Ok(())
}

/// Reset both devices and exercise one ticket and one homing pass.
async fn startup(devices: &Devices, config: &HostConfig) {
    let printer = &devices.printer;
    let reels = &devices.reels;

    let (printer_reset, reels_reset) = tokio::join!(printer.reset(config.crc_seed), reels.reset(config.crc_seed));
    tracing::info!(printer_reset, reels_reset, "Reset complete");

    if printer_reset {
        let self_test = printer.self_test(false).await;
        tracing::info!(self_test, "Printer self test");

        printer.define_region(RegionDefinition {
            id: 1,
            data: "x=0,y=0,w=560,h=40".into(),
        });
        printer.define_template(TemplateDefinition {
            id: 1,
            region_ids: vec![1],
        });
        let printed = printer
            .print_ticket(
                TicketData {
                    template_id: 1,
                    fields: vec!["DEMO TICKET".into()],
                },
                None,
            )
            .await;
        tracing::info!(printed, metrics = ?printer.read_metrics().await, "Demo ticket");
    }

    if reels_reset {
        let homed = reels.home_reels().await;
        let lights = reels.get_reel_light_identifiers().await;
        tracing::info!(homed, reel_count = reels.reel_count(), ?lights, "Reels ready");
    }
}
