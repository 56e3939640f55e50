use gds::Command;
use gds::report::{Metrics, PrinterStatus, TicketPrintStatus, TransferCode, TransferStatus};
use gds::transport::DeviceEnd;
use tokio_util::sync::CancellationToken;

use super::Peripheral;

/// Ticket printer that always has paper and prints every ticket.
pub struct SimulatedPrinter {
    peripheral: Peripheral,
    tickets_printed: u32,
    transfer: Option<Transfer>,
}

struct Transfer {
    file_index: u8,
    expected: u32,
    received: u32,
}

impl SimulatedPrinter {
    pub fn new(device: DeviceEnd) -> Self {
        Self {
            peripheral: Peripheral::new("sim-printer", device, "PRN-4.2.1".into()),
            tickets_printed: 0,
            transfer: None,
        }
    }

    /// Serve commands until `shutdown` fires or the engine goes away.
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
        let was_enabled = self.peripheral.enabled;
        if let Some(command) = self.peripheral.handle_common(command)? {
            self.handle_printer(command)?;
        }
        // Paper-path status follows every enable/disable.
        if was_enabled != self.peripheral.enabled {
            self.report_status()?;
        }
        Ok(())
    }

    fn handle_printer(&mut self, command: Command) -> gds::Result<()> {
        match command {
            Command::PrintTicket(ticket) => {
                tracing::debug!(template_id = ticket.template_id, fields = ticket.fields.len(), "Simulated print");
                self.print(true)?;
            }
            Command::FormFeed => self.print(false)?,
            Command::GraphicTransferSetup {
                file_index,
                file_size,
                ..
            } => {
                self.transfer = Some(Transfer {
                    file_index,
                    expected: file_size,
                    received: 0,
                });
                self.peripheral.reply(TransferStatus {
                    file_index,
                    code: TransferCode::Ready,
                })?;
                if file_size == 0 {
                    self.finish_transfer()?;
                }
            }
            Command::FileTransfer {
                file_index, data, ..
            } => {
                let complete = match self.transfer.as_mut() {
                    Some(transfer) if transfer.file_index == file_index => {
                        transfer.received += data.len() as u32;
                        transfer.received >= transfer.expected
                    }
                    _ => {
                        self.peripheral.reply(TransferStatus {
                            file_index,
                            code: TransferCode::Rejected,
                        })?;
                        false
                    }
                };
                if complete {
                    self.finish_transfer()?;
                }
            }
            Command::PrinterRequestMetrics => {
                self.peripheral.reply(Metrics {
                    data: format!("tickets_printed={}", self.tickets_printed),
                })?;
            }
            Command::DefineRegion(_) | Command::DefineTemplate(_) | Command::PrinterTicketRetract => {}
            other => {
                tracing::debug!(command = other.name(), "Command not supported by printer");
            }
        }
        Ok(())
    }

    fn print(&mut self, with_field_of_interest: bool) -> gds::Result<()> {
        let mut status = |f: fn(&mut TicketPrintStatus)| {
            let mut report = TicketPrintStatus {
                transaction_id: self.peripheral.next_transaction_id(),
                ..Default::default()
            };
            f(&mut report);
            self.peripheral.reply(report)
        };

        status(|s| s.print_in_progress = true)?;
        if with_field_of_interest {
            status(|s| s.field_of_interest1 = true)?;
        }
        status(|s| s.print_complete = true)?;
        self.tickets_printed += 1;
        Ok(())
    }

    fn finish_transfer(&mut self) -> gds::Result<()> {
        if let Some(transfer) = self.transfer.take() {
            self.peripheral.reply(TransferStatus {
                file_index: transfer.file_index,
                code: TransferCode::Complete,
            })?;
        }
        Ok(())
    }

    fn report_status(&mut self) -> gds::Result<()> {
        let transaction_id = self.peripheral.next_transaction_id();
        self.peripheral.reply(PrinterStatus {
            transaction_id,
            top_of_form: true,
            ..Default::default()
        })
    }
}
