//! Device wiring: engines, device state machines, simulators and their
//! background tasks.

use std::fmt::Debug;
use std::sync::Arc;

use gds::GdsEngine;
use gds::transport::ChannelTransport;
use gds_printer::GdsPrinter;
use gds_reels::GdsReelController;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HostConfig;
use crate::simulator::{SimulatedPrinter, SimulatedReelController};

/// The connected devices plus every task spawned on their behalf.
pub struct Devices {
    pub printer: Arc<GdsPrinter>,
    pub reels: Arc<GdsReelController>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Devices {
    /// Disconnect both engines and wait for the background tasks to end.
    /// `shutdown` must already be cancelled for the simulators to stop.
    pub async fn shutdown(self) {
        for engine in [self.printer.engine(), self.reels.engine()] {
            if let Err(e) = engine.disconnect().await {
                tracing::warn!(device = %engine.name(), error = %e, "Disconnect failed");
            }
        }
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Device task ended abnormally");
            }
        }
    }
}

/// Build both devices on top of simulators and connect them.
pub async fn start_simulated(config: &HostConfig, shutdown: &CancellationToken) -> anyhow::Result<Devices> {
    let mut tasks = Vec::new();

    let (transport, inbound, device) = ChannelTransport::pair(config.printer_descriptor());
    let engine = GdsEngine::new("printer", Arc::new(transport), config.engine_options());
    let printer = GdsPrinter::new(engine.clone());
    tasks.push(engine.spawn_reader(inbound));
    tasks.push(tokio::spawn(SimulatedPrinter::new(device).run(shutdown.clone())));
    tasks.push(spawn_event_log("printer", printer.subscribe(), shutdown.clone()));
    engine.connect().await?;

    let (transport, inbound, device) = ChannelTransport::pair(config.reel_descriptor());
    let engine = GdsEngine::new("reels", Arc::new(transport), config.engine_options());
    let reels = GdsReelController::new(engine.clone(), config.max_reels);
    tasks.push(engine.spawn_reader(inbound));
    tasks.push(tokio::spawn(
        SimulatedReelController::new(device, config.reel_count).run(shutdown.clone()),
    ));
    tasks.push(spawn_event_log("reels", reels.subscribe(), shutdown.clone()));
    engine.connect().await?;

    tracing::info!(
        printer = ?printer.configuration(),
        reels = ?reels.engine().configuration(),
        "Devices connected"
    );

    Ok(Devices { printer, reels, tasks })
}

/// Log every event published on `events` until `shutdown` fires.
pub fn spawn_event_log<E>(
    device: &'static str,
    mut events: broadcast::Receiver<E>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    E: Clone + Debug + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => tracing::info!(device, ?event, "Device event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(device, skipped, "Event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
