//! In-memory peripherals speaking GDS frames over a [`DeviceEnd`].
//!
//! Each simulator decodes the command frames the engine writes and answers
//! with encoded report frames, so the whole codec and reader path is
//! exercised without hardware.

mod printer;
mod reels;

pub use printer::SimulatedPrinter;
pub use reels::SimulatedReelController;

use gds::codec;
use gds::report::{CrcData, DeviceState, FailureStatus, GatData, Report};
use gds::transport::DeviceEnd;
use gds::{Command, Result};
use tokio_util::sync::CancellationToken;

/// Lifecycle behaviour shared by every simulated peripheral.
struct Peripheral {
    name: &'static str,
    device: DeviceEnd,
    firmware: String,
    enabled: bool,
    transaction_id: u8,
}

impl Peripheral {
    fn new(name: &'static str, device: DeviceEnd, firmware: String) -> Self {
        Self {
            name,
            device,
            firmware,
            enabled: false,
            transaction_id: 0,
        }
    }

    /// Next non-zero transaction id for reports that must be acknowledged.
    fn next_transaction_id(&mut self) -> u8 {
        self.transaction_id = self.transaction_id.wrapping_add(1).max(1);
        self.transaction_id
    }

    fn reply(&self, report: impl Into<Report>) -> Result<()> {
        let frame = codec::encode_report(&report.into())?;
        self.device.send_frame(frame)
    }

    /// Receive the next decodable command, or `None` on shutdown or when the
    /// engine side is gone.
    async fn next_command(&mut self, shutdown: &CancellationToken) -> Option<Command> {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return None,
                frame = self.device.commands.recv() => frame?,
            };
            match codec::decode_command(&frame) {
                Ok(command) => return Some(command),
                Err(e) => {
                    tracing::warn!(device = self.name, error = %e, "Simulator dropped bad frame");
                }
            }
        }
    }

    /// Answer lifecycle commands. Returns the command back when it is
    /// device specific.
    fn handle_common(&mut self, command: Command) -> Result<Option<Command>> {
        match command {
            Command::Enable | Command::Disable => {
                self.enabled = matches!(command, Command::Enable);
                self.reply(DeviceState {
                    enabled: self.enabled,
                })?;
            }
            Command::SelfTest { .. } => {
                let transaction_id = self.next_transaction_id();
                self.reply(FailureStatus {
                    transaction_id,
                    ..Default::default()
                })?;
            }
            Command::CalculateCrc { seed } => {
                self.reply(CrcData {
                    result: firmware_crc(seed, &self.firmware),
                })?;
            }
            Command::RequestGatReport => {
                self.reply(GatData {
                    data: format!("{} {}", self.name, self.firmware),
                })?;
            }
            Command::Ack { transaction_id, .. } => {
                tracing::trace!(device = self.name, transaction_id, "Ack received");
            }
            other => return Ok(Some(other)),
        }
        Ok(None)
    }
}

/// Deterministic, never-zero checksum of the simulated firmware image.
fn firmware_crc(seed: u32, firmware: &str) -> u16 {
    let mut bytes = seed.to_le_bytes().to_vec();
    bytes.extend_from_slice(firmware.as_bytes());
    let high = codec::crc8(&bytes);
    bytes.reverse();
    let low = codec::crc8(&bytes);
    u16::from_be_bytes([high, low]).max(1)
}
