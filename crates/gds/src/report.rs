//! Inbound, device-originated reports.
//!
//! Every report kind has its own struct; [`Report`] is the tag union the
//! transport produces and the engine dispatches on. Reports are immutable
//! once decoded.

use serde::{Deserialize, Serialize};

/// Tag identifying a report kind. The discriminant is the frame header code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReportKind {
    DeviceState = 0x80,
    FailureStatus = 0x81,
    FailureStatusClear = 0x82,
    TicketPrintStatus = 0x83,
    TransferStatus = 0x84,
    Metrics = 0x85,
    PrinterStatus = 0x86,
    ReelStatus = 0x87,
    ReelSpinningStatus = 0x88,
    ReelLightResponse = 0x89,
    ReelLightIdentifiersResponse = 0x8a,
    TiltReelsResponse = 0x8b,
    ControllerInitializedStatus = 0x8c,
    CrcData = 0x8d,
    GatData = 0x8e,
}

impl ReportKind {
    pub const ALL: [ReportKind; 15] = [
        ReportKind::DeviceState,
        ReportKind::FailureStatus,
        ReportKind::FailureStatusClear,
        ReportKind::TicketPrintStatus,
        ReportKind::TransferStatus,
        ReportKind::Metrics,
        ReportKind::PrinterStatus,
        ReportKind::ReelStatus,
        ReportKind::ReelSpinningStatus,
        ReportKind::ReelLightResponse,
        ReportKind::ReelLightIdentifiersResponse,
        ReportKind::TiltReelsResponse,
        ReportKind::ControllerInitializedStatus,
        ReportKind::CrcData,
        ReportKind::GatData,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// Enabled/disabled state announced by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub enabled: bool,
}

/// Per-reel error bits carried by failure and failure-clear reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelFailure {
    pub reel_id: u8,
    pub stall: bool,
    pub tamper: bool,
    pub low_voltage: bool,
    pub failed_home: bool,
}

/// Hardware/firmware failure bits. `reel` is set only by reel controllers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureStatus {
    pub transaction_id: u8,
    pub firmware_error: bool,
    pub component_error: bool,
    pub nvm_error: bool,
    pub print_head_damaged: bool,
    pub temperature_error: bool,
    pub diagnostic_code: bool,
    pub communication_error: bool,
    pub hardware_error: bool,
    pub reel: Option<ReelFailure>,
}

/// Failure bits the device reports as no longer present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureStatusClear {
    pub transaction_id: u8,
    pub firmware_error: bool,
    pub component_error: bool,
    pub communication_error: bool,
    pub hardware_error: bool,
    pub reel: Option<ReelFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPrintStatus {
    pub transaction_id: u8,
    pub field_of_interest1: bool,
    pub field_of_interest2: bool,
    pub field_of_interest3: bool,
    pub print_in_progress: bool,
    pub print_complete: bool,
    pub print_incomplete: bool,
}

impl TicketPrintStatus {
    /// Whether any field-of-interest flag is set.
    pub fn field_of_interest(&self) -> bool {
        self.field_of_interest1 || self.field_of_interest2 || self.field_of_interest3
    }
}

/// Progress of a graphic/file transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCode {
    #[default]
    Ready,
    Complete,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub file_index: u8,
    pub code: TransferCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterStatus {
    pub transaction_id: u8,
    pub paper_empty: bool,
    pub paper_low: bool,
    pub paper_jam: bool,
    pub paper_in_chute: bool,
    pub print_head_open: bool,
    pub chassis_open: bool,
    pub top_of_form: bool,
    pub ticket_retractable: bool,
    pub print_incomplete: bool,
}

/// Connectivity and mechanical state of a single reel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelStatus {
    pub transaction_id: u8,
    pub reel_id: u8,
    pub connected: bool,
    pub reel_stall: bool,
    pub reel_tamper: bool,
    pub low_voltage: bool,
    pub failed_home: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelSpinningStatus {
    pub transaction_id: u8,
    pub reel_id: u8,
    pub idle_at_stop: bool,
    pub spinning: bool,
    pub slow_spinning: bool,
    pub step: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelLightResponse {
    pub lights_updated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelLightIdentifiersResponse {
    pub start_id: u32,
    pub end_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiltReelsResponse {
    pub tilted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInitializedStatus {
    pub reel_count: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrcData {
    pub result: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatData {
    pub data: String,
}

/// Binds a report struct to its tag so the engine can dispatch and await by type.
pub trait GdsReport: Sized + Send + 'static {
    const KIND: ReportKind;

    fn from_report(report: Report) -> Option<Self>;

    fn from_report_ref(report: &Report) -> Option<&Self>;

    fn into_report(self) -> Report;
}

macro_rules! reports {
    ($($variant:ident),* $(,)?) => {
        /// Tag union of every inbound report kind.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum Report {
            $($variant($variant),)*
        }

        impl Report {
            pub fn kind(&self) -> ReportKind {
                match self {
                    $(Report::$variant(_) => ReportKind::$variant,)*
                }
            }
        }

        $(
            impl GdsReport for $variant {
                const KIND: ReportKind = ReportKind::$variant;

                fn from_report(report: Report) -> Option<Self> {
                    match report {
                        Report::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn from_report_ref(report: &Report) -> Option<&Self> {
                    match report {
                        Report::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn into_report(self) -> Report {
                    Report::$variant(self)
                }
            }

            impl From<$variant> for Report {
                fn from(inner: $variant) -> Self {
                    Report::$variant(inner)
                }
            }
        )*
    };
}

reports!(
    DeviceState,
    FailureStatus,
    FailureStatusClear,
    TicketPrintStatus,
    TransferStatus,
    Metrics,
    PrinterStatus,
    ReelStatus,
    ReelSpinningStatus,
    ReelLightResponse,
    ReelLightIdentifiersResponse,
    TiltReelsResponse,
    ControllerInitializedStatus,
    CrcData,
    GatData,
);

impl Report {
    /// Transaction id to acknowledge, for reports that carry one.
    pub fn transaction_id(&self) -> Option<u8> {
        match self {
            Report::FailureStatus(r) => Some(r.transaction_id),
            Report::FailureStatusClear(r) => Some(r.transaction_id),
            Report::TicketPrintStatus(r) => Some(r.transaction_id),
            Report::PrinterStatus(r) => Some(r.transaction_id),
            Report::ReelStatus(r) => Some(r.transaction_id),
            Report::ReelSpinningStatus(r) => Some(r.transaction_id),
            _ => None,
        }
    }
}
