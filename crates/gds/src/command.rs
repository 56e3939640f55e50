//! Outbound, platform-originated commands.
//!
//! Commands are created per call, encoded by [`crate::codec`] and handed to
//! the transport. They are never retained.

use serde::{Deserialize, Serialize};

/// Printer region definition (PDL text as understood by the device).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDefinition {
    pub id: u16,
    pub data: String,
}

/// Printer template definition referencing previously defined regions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub id: u16,
    pub region_ids: Vec<u16>,
}

/// Ticket content printed against a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketData {
    pub template_id: u16,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphicType {
    #[default]
    Bitmap,
    Font,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpinDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelSpinData {
    pub reel_id: u8,
    pub direction: SpinDirection,
    pub rpm: u16,
    pub step: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeReelData {
    pub reel_id: u8,
    pub direction: SpinDirection,
    pub rpm: u16,
    pub step: i32,
    pub delay_ms: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelSpeedData {
    pub reel_id: u8,
    pub speed: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelLampData {
    pub lamp_id: u32,
    /// 0xRRGGBB
    pub color: u32,
    pub is_lamp_on: bool,
}

/// Tag union of every outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Enable,
    Disable,
    SelfTest { nvm_clear: bool },
    Ack { transaction_id: u8, requires_response: bool },
    CalculateCrc { seed: u32 },
    RequestGatReport,
    DefineRegion(RegionDefinition),
    DefineTemplate(TemplateDefinition),
    PrintTicket(TicketData),
    FormFeed,
    GraphicTransferSetup { graphic_type: GraphicType, file_index: u8, file_size: u32 },
    FileTransfer { file_index: u8, offset: u32, data: Vec<u8> },
    PrinterTicketRetract,
    PrinterRequestMetrics,
    HomeReel { reel_id: u8, stop: i32 },
    SpinReels(Vec<ReelSpinData>),
    Nudge(Vec<NudgeReelData>),
    SetBrightness { brightness: u8 },
    SetSpeed(Vec<ReelSpeedData>),
    SetLamps(Vec<ReelLampData>),
    SetOffsets(Vec<i32>),
    TiltReels,
    GetReelLightIdentifiers,
}

impl Command {
    /// Frame header code for this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Enable => 0x01,
            Command::Disable => 0x02,
            Command::SelfTest { .. } => 0x03,
            Command::Ack { .. } => 0x04,
            Command::CalculateCrc { .. } => 0x05,
            Command::RequestGatReport => 0x06,
            Command::DefineRegion(_) => 0x10,
            Command::DefineTemplate(_) => 0x11,
            Command::PrintTicket(_) => 0x12,
            Command::FormFeed => 0x13,
            Command::GraphicTransferSetup { .. } => 0x14,
            Command::FileTransfer { .. } => 0x15,
            Command::PrinterTicketRetract => 0x16,
            Command::PrinterRequestMetrics => 0x17,
            Command::HomeReel { .. } => 0x20,
            Command::SpinReels(_) => 0x21,
            Command::Nudge(_) => 0x22,
            Command::SetBrightness { .. } => 0x23,
            Command::SetSpeed(_) => 0x24,
            Command::SetLamps(_) => 0x25,
            Command::SetOffsets(_) => 0x26,
            Command::TiltReels => 0x27,
            Command::GetReelLightIdentifiers => 0x28,
        }
    }

    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Enable => "Enable",
            Command::Disable => "Disable",
            Command::SelfTest { .. } => "SelfTest",
            Command::Ack { .. } => "Ack",
            Command::CalculateCrc { .. } => "CalculateCrc",
            Command::RequestGatReport => "RequestGatReport",
            Command::DefineRegion(_) => "DefineRegion",
            Command::DefineTemplate(_) => "DefineTemplate",
            Command::PrintTicket(_) => "PrintTicket",
            Command::FormFeed => "FormFeed",
            Command::GraphicTransferSetup { .. } => "GraphicTransferSetup",
            Command::FileTransfer { .. } => "FileTransfer",
            Command::PrinterTicketRetract => "PrinterTicketRetract",
            Command::PrinterRequestMetrics => "PrinterRequestMetrics",
            Command::HomeReel { .. } => "HomeReel",
            Command::SpinReels(_) => "SpinReels",
            Command::Nudge(_) => "Nudge",
            Command::SetBrightness { .. } => "SetBrightness",
            Command::SetSpeed(_) => "SetSpeed",
            Command::SetLamps(_) => "SetLamps",
            Command::SetOffsets(_) => "SetOffsets",
            Command::TiltReels => "TiltReels",
            Command::GetReelLightIdentifiers => "GetReelLightIdentifiers",
        }
    }
}
