//! GDS ticket printer.
//!
//! Drives the print-job lifecycle on top of a [`gds::GdsEngine`], keeps the
//! printer's fault and warning bitmasks, and normalises vendor firmware
//! identification at connect time.

pub mod faults;
pub mod firmware;
mod printer;

// Re-exports for convenience
pub use faults::{PrinterFaultTypes, PrinterWarningTypes};
pub use printer::{FieldOfInterestCallback, GdsPrinter, PrinterEvent};
