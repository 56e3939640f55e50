//! Generic Device Services (GDS) protocol engine.
//!
//! Provides the report/command tag unions, frame codec, transport
//! abstraction and the engine that demultiplexes inbound reports and
//! correlates them with outbound commands. Device state machines
//! (printer, reel controller) are built on top of [`GdsEngine`].

pub mod codec;
pub mod command;
pub mod configuration;
pub mod engine;
pub mod faults;
pub mod options;
pub mod report;
pub mod transport;

// Re-exports for convenience
pub use command::Command;
pub use configuration::DeviceConfiguration;
pub use engine::{ConnectionEvent, ConnectionState, GdsEngine};
pub use faults::{Edge, FaultBits, FaultState};
pub use options::EngineOptions;
pub use report::{GdsReport, Report, ReportKind};
pub use transport::{Transport, TransportEvent};

/// Errors raised by the transport and codec plumbing.
///
/// Device-level conditions (paper jams, reel stalls) are never errors;
/// they surface as fault state plus events.
#[derive(Debug, thiserror::Error)]
pub enum GdsError {
    #[error("Not connected to device")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Payload encoding error: {0}")]
    Payload(#[from] postcard::Error),

    #[error("Report kind mismatch: header {header:#04x}, payload {payload:#04x}")]
    KindMismatch { header: u8, payload: u8 },

    #[error("Unknown report kind {0:#04x}")]
    UnknownReportKind(u8),

    #[error("Unknown command code {0:#04x}")]
    UnknownCommandCode(u8),
}

/// Result type alias for GDS operations.
pub type Result<T> = std::result::Result<T, GdsError>;
