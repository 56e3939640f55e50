use gds::Command;
use gds::report::{
    ControllerInitializedStatus, GatData, ReelLightIdentifiersResponse, ReelLightResponse, ReelSpinningStatus,
    ReelStatus, TiltReelsResponse,
};
use gds::transport::DeviceEnd;
use tokio_util::sync::CancellationToken;

use super::Peripheral;

/// Lamps fitted behind each simulated reel.
const LIGHTS_PER_REEL: u32 = 3;

/// Reel controller with `reel_count` healthy reels that stop wherever they
/// are told to.
pub struct SimulatedReelController {
    peripheral: Peripheral,
    reel_count: u8,
}

impl SimulatedReelController {
    pub fn new(device: DeviceEnd, reel_count: u8) -> Self {
        Self {
            peripheral: Peripheral::new("sim-reels", device, "RC-1.0".into()),
            reel_count,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        while let Some(command) = self.peripheral.next_command(&shutdown).await {
            if let Err(e) = self.handle(command) {
                tracing::warn!(device = self.peripheral.name, error = %e, "Simulator reply failed");
                break;
            }
        }
        tracing::debug!(device = self.peripheral.name, "Simulator stopped");
    }

    fn handle(&mut self, command: Command) -> gds::Result<()> {
        // The GAT report is the last reset step; the controller answers it
        // and then announces its reels.
        if matches!(command, Command::RequestGatReport) {
            self.peripheral.reply(GatData {
                data: format!("{} {}", self.peripheral.name, self.peripheral.firmware),
            })?;
            return self.announce_reels();
        }

        let Some(command) = self.peripheral.handle_common(command)? else {
            return Ok(());
        };

        match command {
            Command::HomeReel { reel_id, stop } => {
                let step = u16::try_from(stop.max(0)).unwrap_or(u16::MAX);
                self.spinning(reel_id, |s| s.spinning = true)?;
                self.spinning(reel_id, |s| {
                    s.idle_at_stop = true;
                    s.step = step;
                })?;
            }
            Command::SpinReels(spins) => {
                for spin in spins {
                    self.spinning(spin.reel_id, |s| s.spinning = true)?;
                }
            }
            Command::Nudge(nudges) => {
                for nudge in nudges {
                    let step = u16::try_from(nudge.step.max(0)).unwrap_or(u16::MAX);
                    self.spinning(nudge.reel_id, |s| {
                        s.idle_at_stop = true;
                        s.step = step;
                    })?;
                }
            }
            Command::SetBrightness { .. } | Command::SetLamps(_) => {
                self.peripheral.reply(ReelLightResponse { lights_updated: true })?;
            }
            Command::TiltReels => {
                self.peripheral.reply(TiltReelsResponse { tilted: true })?;
            }
            Command::GetReelLightIdentifiers => {
                self.peripheral.reply(ReelLightIdentifiersResponse {
                    start_id: 1,
                    end_id: u32::from(self.reel_count) * LIGHTS_PER_REEL,
                })?;
            }
            Command::SetSpeed(_) | Command::SetOffsets(_) => {}
            other => {
                tracing::debug!(command = other.name(), "Command not supported by reel controller");
            }
        }
        Ok(())
    }

    /// Reel statuses go out before the initialized status so they are
    /// already applied when a reset completes.
    fn announce_reels(&mut self) -> gds::Result<()> {
        for reel_id in 1..=self.reel_count {
            let transaction_id = self.peripheral.next_transaction_id();
            self.peripheral.reply(ReelStatus {
                transaction_id,
                reel_id,
                connected: true,
                ..Default::default()
            })?;
        }
        self.peripheral.reply(ControllerInitializedStatus {
            reel_count: self.reel_count,
        })
    }

    fn spinning(&mut self, reel_id: u8, f: impl FnOnce(&mut ReelSpinningStatus)) -> gds::Result<()> {
        let mut report = ReelSpinningStatus {
            transaction_id: self.peripheral.next_transaction_id(),
            reel_id,
            ..Default::default()
        };
        f(&mut report);
        self.peripheral.reply(report)
    }
}
