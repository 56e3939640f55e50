//! Printer device state machine.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use gds::codec::MAX_TRANSFER_CHUNK;
use gds::command::{GraphicType, RegionDefinition, TemplateDefinition, TicketData};
use gds::report::{
    FailureStatus, FailureStatusClear, Metrics, PrinterStatus, TicketPrintStatus, TransferCode,
    TransferStatus,
};
use gds::{Command, ConnectionEvent, DeviceConfiguration, Edge, FaultState, GdsEngine, GdsReport};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::faults::{PrinterFaultTypes, PrinterWarningTypes};
use crate::firmware;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Invoked once per ticket when the first field of interest has printed.
pub type FieldOfInterestCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Events published to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterEvent {
    Connected,
    Disconnected,
    FaultOccurred(PrinterFaultTypes),
    FaultCleared(PrinterFaultTypes),
    WarningOccurred(PrinterWarningTypes),
    WarningCleared(PrinterWarningTypes),
    /// Raw failure report, republished for downstream consumers.
    FailureReported(FailureStatus),
    FieldOfInterestPrinted,
    PrintInProgress,
    PrintCompleted,
    PrintIncomplete,
}

/// Ticket printer built on a [`GdsEngine`].
pub struct GdsPrinter {
    engine: Arc<GdsEngine>,
    printing: AtomicBool,
    can_retract: AtomicBool,
    faults: Mutex<FaultState<PrinterFaultTypes>>,
    warnings: Mutex<FaultState<PrinterWarningTypes>>,
    print_cancel: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<PrinterEvent>,
}

/// Marks the printer busy for the lifetime of one print or form feed.
struct PrintJob<'a> {
    printer: &'a GdsPrinter,
    cancel: CancellationToken,
}

impl<'a> PrintJob<'a> {
    fn new(printer: &'a GdsPrinter) -> Self {
        let cancel = CancellationToken::new();
        *printer.print_cancel.lock() = Some(cancel.clone());
        Self { printer, cancel }
    }
}

impl Drop for PrintJob<'_> {
    fn drop(&mut self) {
        self.printer.print_cancel.lock().take();
        self.printer.printing.store(false, Ordering::Release);
    }
}

impl GdsPrinter {
    /// Create the printer and register its report handlers on `engine`.
    pub fn new(engine: Arc<GdsEngine>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let printer = Arc::new(Self {
            engine,
            printing: AtomicBool::new(false),
            can_retract: AtomicBool::new(false),
            faults: Mutex::new(FaultState::new()),
            warnings: Mutex::new(FaultState::new()),
            print_cancel: Mutex::new(None),
            events,
        });

        printer.handle(Self::on_failure_status);
        printer.handle(Self::on_failure_clear);
        printer.handle(Self::on_printer_status);
        printer.handle(Self::on_ticket_print_status);

        let weak = Arc::downgrade(&printer);
        printer.engine.on_connection_event(move |event| {
            if let Some(printer) = weak.upgrade() {
                printer.on_connection_event(event);
            }
        });

        printer
    }

    fn handle<T: GdsReport>(self: &Arc<Self>, handler: fn(&Self, &T)) {
        let weak = Arc::downgrade(self);
        self.engine.register_callback::<T>(move |report| {
            if let Some(printer) = weak.upgrade() {
                handler(&printer, report);
            }
        });
    }

    pub fn engine(&self) -> &Arc<GdsEngine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events.subscribe()
    }

    pub fn configuration(&self) -> DeviceConfiguration {
        self.engine.configuration()
    }

    pub fn is_printing(&self) -> bool {
        self.printing.load(Ordering::Acquire)
    }

    pub fn can_retract(&self) -> bool {
        self.can_retract.load(Ordering::Acquire)
    }

    pub fn faults(&self) -> PrinterFaultTypes {
        self.faults.lock().current()
    }

    pub fn warnings(&self) -> PrinterWarningTypes {
        self.warnings.lock().current()
    }

    fn publish(&self, event: PrinterEvent) {
        tracing::trace!(device = %self.engine.name(), ?event, "Printer event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // -- Fault / warning consolidation --

    /// Set or clear printer faults, publishing one event per actual change.
    pub fn set_fault(&self, faults: PrinterFaultTypes, present: bool) {
        let edge = self.faults.lock().update(faults, present);
        match edge {
            Some(Edge::Occurred(faults)) => {
                tracing::warn!(device = %self.engine.name(), ?faults, "Printer fault occurred");
                self.publish(PrinterEvent::FaultOccurred(faults));
            }
            Some(Edge::Cleared(faults)) => {
                tracing::info!(device = %self.engine.name(), ?faults, "Printer fault cleared");
                self.publish(PrinterEvent::FaultCleared(faults));
            }
            None => {}
        }
    }

    /// Set or clear printer warnings, publishing one event per actual change.
    pub fn set_warning(&self, warnings: PrinterWarningTypes, present: bool) {
        let edge = self.warnings.lock().update(warnings, present);
        match edge {
            Some(Edge::Occurred(warnings)) => {
                tracing::info!(device = %self.engine.name(), ?warnings, "Printer warning occurred");
                self.publish(PrinterEvent::WarningOccurred(warnings));
            }
            Some(Edge::Cleared(warnings)) => {
                tracing::info!(device = %self.engine.name(), ?warnings, "Printer warning cleared");
                self.publish(PrinterEvent::WarningCleared(warnings));
            }
            None => {}
        }
    }

    // -- Report handlers --

    fn ack(&self, transaction_id: u8) {
        if transaction_id == 0 {
            return;
        }
        if let Err(e) = self.engine.ack(transaction_id, false) {
            tracing::warn!(device = %self.engine.name(), transaction_id, error = %e, "Ack failed");
        }
    }

    fn on_failure_status(&self, report: &FailureStatus) {
        self.ack(report.transaction_id);
        let faults = PrinterFaultTypes::when(PrinterFaultTypes::FIRMWARE_FAULT, report.firmware_error)
            | PrinterFaultTypes::when(PrinterFaultTypes::NVM_FAULT, report.nvm_error)
            | PrinterFaultTypes::when(PrinterFaultTypes::PRINT_HEAD_DAMAGED, report.print_head_damaged)
            | PrinterFaultTypes::when(PrinterFaultTypes::TEMPERATURE_ERROR, report.temperature_error)
            | PrinterFaultTypes::when(
                PrinterFaultTypes::OTHER_FAULT,
                report.diagnostic_code || report.component_error,
            );
        self.set_fault(faults, true);
        self.publish(PrinterEvent::FailureReported(report.clone()));
    }

    fn on_failure_clear(&self, report: &FailureStatusClear) {
        self.ack(report.transaction_id);
        let cleared = PrinterFaultTypes::when(PrinterFaultTypes::FIRMWARE_FAULT, report.firmware_error)
            | PrinterFaultTypes::when(
                PrinterFaultTypes::OTHER_FAULT,
                report.component_error || report.communication_error || report.hardware_error,
            );
        self.set_fault(cleared, false);
    }

    fn on_printer_status(&self, status: &PrinterStatus) {
        self.ack(status.transaction_id);

        // Logged only: PAPER_NOT_TOP_OF_FORM is never raised from status
        // reports, or clearing paper-empty requests a second lockup.
        let top_of_form = status.paper_empty || self.is_printing() || status.top_of_form;
        tracing::debug!(device = %self.engine.name(), top_of_form, "Printer status");

        // One set/clear per kind so each kind raises its own event.
        for (fault, present) in [
            (PrinterFaultTypes::PAPER_EMPTY, status.paper_empty),
            (PrinterFaultTypes::PAPER_JAM, status.paper_jam),
            (PrinterFaultTypes::PRINT_HEAD_OPEN, status.print_head_open),
            (PrinterFaultTypes::CHASSIS_OPEN, status.chassis_open),
        ] {
            self.set_fault(fault, present);
        }
        for (warning, present) in [
            (PrinterWarningTypes::PAPER_LOW, status.paper_low),
            (PrinterWarningTypes::PAPER_IN_CHUTE, status.paper_in_chute),
        ] {
            self.set_warning(warning, present);
        }

        self.can_retract.store(
            status.ticket_retractable && status.print_incomplete,
            Ordering::Release,
        );
    }

    fn on_ticket_print_status(&self, status: &TicketPrintStatus) {
        self.ack(status.transaction_id);
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                let (vendor, config) = firmware::normalize(self.engine.configuration());
                tracing::debug!(device = %self.engine.name(), ?vendor, "Normalising printer identity");
                self.engine.update_configuration(config);
                self.publish(PrinterEvent::Connected);
            }
            ConnectionEvent::Disconnected => {
                self.cancel_printing();
                self.can_retract.store(false, Ordering::Release);
                self.publish(PrinterEvent::Disconnected);
            }
        }
    }

    // -- Operations --

    /// Engine reset checks: disable, firmware CRC, GAT report.
    pub async fn reset(&self, crc_seed: u32) -> bool {
        self.engine.run_reset_checks(crc_seed).await
    }

    /// Run the device self test. Only valid while disabled.
    pub async fn self_test(&self, nvm_clear: bool) -> bool {
        if self.engine.is_enabled() {
            tracing::warn!(device = %self.engine.name(), "Self test refused while enabled");
            return false;
        }

        let timeout = self.engine.options().extended_timeout;
        let Some(report) = self
            .engine
            .request::<FailureStatus>(&Command::SelfTest { nvm_clear }, timeout)
            .await
        else {
            tracing::warn!(device = %self.engine.name(), "No self test result");
            return false;
        };

        let passed = !(report.firmware_error
            || report.nvm_error
            || report.print_head_damaged
            || report.temperature_error
            || report.diagnostic_code);
        if !passed {
            tracing::warn!(device = %self.engine.name(), ?report, "Self test failed");
        }
        passed
    }

    pub fn define_region(&self, region: RegionDefinition) -> bool {
        self.send(Command::DefineRegion(region))
    }

    pub fn define_template(&self, template: TemplateDefinition) -> bool {
        self.send(Command::DefineTemplate(template))
    }

    fn send(&self, command: Command) -> bool {
        match self.engine.send_command(&command) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device = %self.engine.name(), command = command.name(), error = %e, "Command not sent");
                false
            }
        }
    }

    /// Print a ticket and wait until the printer reports the outcome.
    pub async fn print_ticket(
        &self,
        ticket: TicketData,
        on_field_of_interest: Option<FieldOfInterestCallback>,
    ) -> bool {
        let Some(job) = self.begin_job("print_ticket").await else {
            return false;
        };

        self.engine.clear_report::<TicketPrintStatus>();
        if !self.send(Command::PrintTicket(ticket)) {
            return false;
        }
        let printed = self.wait_for_print_complete(on_field_of_interest, &job.cancel).await;
        drop(job);

        if printed {
            self.publish(PrinterEvent::PrintCompleted);
        }
        printed
    }

    /// Advance one blank ticket. Always ends by publishing `PrintCompleted`.
    pub async fn form_feed(&self) -> bool {
        let Some(job) = self.begin_job("form_feed").await else {
            return false;
        };

        self.engine.clear_report::<TicketPrintStatus>();
        let fed = self.send(Command::FormFeed) && self.follow_print(None, &job.cancel, false).await;
        drop(job);

        self.publish(PrinterEvent::PrintCompleted);
        fed
    }

    async fn begin_job(&self, operation: &'static str) -> Option<PrintJob<'_>> {
        if self.printing.swap(true, Ordering::AcqRel) {
            tracing::warn!(device = %self.engine.name(), operation, "Printer busy");
            return None;
        }
        let job = PrintJob::new(self);

        if !self.engine.is_enabled() && !self.engine.enable().await {
            tracing::warn!(device = %self.engine.name(), operation, "Printer could not be enabled");
            return None;
        }
        Some(job)
    }

    /// Follow `TicketPrintStatus` reports until the ticket completes or fails.
    ///
    /// The field-of-interest callback runs at most once, at the first report
    /// flagging a field of interest or at completion if none did. One
    /// unexpected report is tolerated before giving up.
    pub async fn wait_for_print_complete(
        &self,
        on_field_of_interest: Option<FieldOfInterestCallback>,
        cancel: &CancellationToken,
    ) -> bool {
        self.follow_print(on_field_of_interest, cancel, true).await
    }

    /// A blank feed has no fields, so `FieldOfInterestPrinted` is only
    /// published when `has_fields` is set.
    async fn follow_print(
        &self,
        mut on_field_of_interest: Option<FieldOfInterestCallback>,
        cancel: &CancellationToken,
        has_fields: bool,
    ) -> bool {
        let timeout = self.engine.options().normal_timeout;
        let mut notified = false;
        let mut retried = false;

        loop {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(device = %self.engine.name(), "Print cancelled");
                    return false;
                }
                status = self.engine.wait_for::<TicketPrintStatus>(timeout) => status,
            };

            let Some(status) = status else {
                tracing::warn!(device = %self.engine.name(), "No print status from printer");
                self.cancel_printing();
                return false;
            };
            tracing::debug!(device = %self.engine.name(), ?status, "Ticket print status");

            if (status.field_of_interest() || status.print_complete) && !notified {
                notified = true;
                if has_fields {
                    self.publish(PrinterEvent::FieldOfInterestPrinted);
                }
                if let Some(callback) = on_field_of_interest.take() {
                    callback().await;
                }
            }

            if status.print_complete {
                return true;
            }
            if status.print_incomplete {
                self.publish(PrinterEvent::PrintIncomplete);
                self.cancel_printing();
                return false;
            }
            if status.print_in_progress {
                self.publish(PrinterEvent::PrintInProgress);
                continue;
            }
            if status.field_of_interest() {
                continue;
            }

            if retried {
                tracing::warn!(device = %self.engine.name(), "Unexpected print status, giving up");
                self.cancel_printing();
                return false;
            }
            retried = true;
        }
    }

    /// Cancel the in-flight print job, if any. Idempotent.
    pub fn cancel_printing(&self) {
        if let Some(token) = self.print_cancel.lock().as_ref() {
            if !token.is_cancelled() {
                tracing::info!(device = %self.engine.name(), "Cancelling print job");
                token.cancel();
            }
        }
    }

    /// Request the printer's metrics block.
    pub async fn read_metrics(&self) -> Option<String> {
        let timeout = self.engine.options().normal_timeout;
        self.engine
            .request::<Metrics>(&Command::PrinterRequestMetrics, timeout)
            .await
            .map(|metrics| metrics.data)
    }

    /// Pull an incompletely printed ticket back into the printer.
    pub fn retract_ticket(&self) -> bool {
        if !self.can_retract() {
            tracing::warn!(device = %self.engine.name(), "No retractable ticket");
            return false;
        }
        if !self.send(Command::PrinterTicketRetract) {
            return false;
        }
        self.can_retract.store(false, Ordering::Release);
        true
    }

    /// Upload a bitmap or font in `MAX_TRANSFER_CHUNK` sized blocks.
    pub async fn transfer_file(&self, graphic_type: GraphicType, file_index: u8, data: &[u8]) -> bool {
        let Ok(file_size) = u32::try_from(data.len()) else {
            tracing::warn!(device = %self.engine.name(), len = data.len(), "File too large to transfer");
            return false;
        };

        let setup = Command::GraphicTransferSetup {
            graphic_type,
            file_index,
            file_size,
        };
        let timeout = self.engine.options().normal_timeout;
        match self.engine.request::<TransferStatus>(&setup, timeout).await {
            Some(status) if status.file_index == file_index && status.code == TransferCode::Ready => {}
            other => {
                tracing::warn!(device = %self.engine.name(), file_index, status = ?other, "Transfer setup refused");
                return false;
            }
        }

        for (index, chunk) in data.chunks(MAX_TRANSFER_CHUNK).enumerate() {
            let command = Command::FileTransfer {
                file_index,
                offset: (index * MAX_TRANSFER_CHUNK) as u32,
                data: chunk.to_vec(),
            };
            if !self.send(command) {
                return false;
            }
        }

        let timeout = self.engine.options().extended_timeout;
        let status = self
            .engine
            .wait_for_matching::<TransferStatus, _>(timeout, move |s| s.file_index == file_index)
            .await;
        match status {
            Some(status) if status.code == TransferCode::Complete => {
                tracing::info!(device = %self.engine.name(), file_index, file_size, "File transferred");
                true
            }
            other => {
                tracing::warn!(device = %self.engine.name(), file_index, status = ?other, "File transfer failed");
                false
            }
        }
    }
}
